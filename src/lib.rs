//! SM-2 review scheduling: a pure transition function plus an orchestrator
//! that applies each learner response to its stored review record exactly once.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod scheduler;
pub mod srs;
pub mod store;

pub use config::{Config, SchedulerConfig};
pub use db::Db;
pub use error::{ScheduleError, StoreError};
pub use events::{EventBus, ReviewRecorded};
pub use models::{Quality, ReviewKey, ReviewState, SubmitResponse};
pub use scheduler::Scheduler;
pub use store::{MemoryStore, ReviewStore};
