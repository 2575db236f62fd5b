use std::time::Duration;

use thiserror::Error;

use crate::models::{Quality, ReviewKey};

/// Failures raised by a [`crate::store::ReviewStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The stored version no longer matches what the writer read.
    /// `expected == None` means the writer expected no row at all.
    #[error("version conflict on {key}: expected {expected:?}")]
    Conflict { key: ReviewKey, expected: Option<i64> },

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt review record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("review store unavailable for {key} (quality {quality}): {source}")]
    StoreUnavailable {
        key: ReviewKey,
        quality: Quality,
        #[source]
        source: StoreError,
    },

    #[error("gave up on {key} (quality {quality}) after {attempts} conflicting attempts")]
    ConcurrencyConflict {
        key: ReviewKey,
        quality: Quality,
        attempts: u32,
    },
}

impl ScheduleError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ScheduleError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether resubmitting the same response later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScheduleError::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
