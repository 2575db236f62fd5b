use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::SchedulerConfig;
use crate::error::{Result, ScheduleError, StoreError};
use crate::events::{EventBus, ReviewRecorded};
use crate::models::{Quality, ReviewKey, ReviewState, SubmitResponse};
use crate::srs::{calculate_next_review, format_interval};
use crate::store::ReviewStore;

/// Applies responses to review records, one at a time per key.
///
/// Inside one process, responses for the same key queue on a FIFO lock and
/// apply in arrival order. Across processes the store's version check
/// catches lost updates; a conflicting attempt re-reads and recomputes.
pub struct Scheduler {
    store: Arc<dyn ReviewStore>,
    config: SchedulerConfig,
    locks: KeyedLocks,
    events: Option<EventBus>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ReviewStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            locks: KeyedLocks::default(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validates raw input and records the response.
    pub async fn record_response(
        &self,
        learner_id: &str,
        question_id: &str,
        quality: i64,
        answered_at: DateTime<Utc>,
    ) -> Result<ReviewState> {
        let quality = Quality::new(quality)?;
        let key = ReviewKey::new(learner_id, question_id)?;
        self.record(&key, quality, answered_at).await
    }

    pub async fn record_submission(&self, submission: SubmitResponse) -> Result<ReviewState> {
        let (key, quality, answered_at) = submission.validate()?;
        self.record(&key, quality, answered_at).await
    }

    pub async fn record(&self, key: &ReviewKey, quality: Quality, answered_at: DateTime<Utc>) -> Result<ReviewState> {
        let _guard = self.locks.lock(key).await;
        let max_attempts = self.config.max_attempts.max(1);
        let unavailable = |source: StoreError| ScheduleError::StoreUnavailable {
            key: key.clone(),
            quality,
            source,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            // Always re-read; a previous attempt's result is never reused.
            let prior = match self.with_timeout(self.store.get(key)).await {
                Ok(prior) => prior,
                Err(e) if attempt < max_attempts => {
                    log::warn!("reading {} failed (attempt {}/{}): {}", key, attempt, max_attempts, e);
                    self.backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(unavailable(e)),
            };

            let next = calculate_next_review(prior.as_ref(), key, quality, answered_at, Utc::now());
            let expected = prior.as_ref().map(|p| p.version);

            // A failed write other than a conflict has an unknown outcome and
            // is not retried here, so a response is never applied twice.
            match self.with_timeout(self.store.upsert(&next, expected)).await {
                Ok(saved) => {
                    log::debug!(
                        "{} q={} -> repetition {} interval {} easiness {:.2} due {}",
                        key,
                        quality,
                        saved.repetition,
                        format_interval(saved.interval),
                        saved.easiness,
                        saved.due_at
                    );
                    if let Some(events) = &self.events {
                        events.publish(ReviewRecorded::new(saved.clone(), quality.value(), answered_at));
                    }
                    return Ok(saved);
                }
                Err(e) if e.is_conflict() => {
                    if attempt >= max_attempts {
                        return Err(ScheduleError::ConcurrencyConflict {
                            key: key.clone(),
                            quality,
                            attempts: attempt,
                        });
                    }
                    log::warn!("{} changed underneath us (attempt {}/{}), retrying", key, attempt, max_attempts);
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(unavailable(e)),
            }
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = std::result::Result<T, StoreError>>) -> std::result::Result<T, StoreError> {
        let limit = self.config.store_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = backoff_delay(self.config.retry_backoff, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// `base * 2^(attempt-1)` plus up to `base` of jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let exp = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
    let base_ms = base.as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=base_ms);
    exp + Duration::from_millis(jitter)
}

type Slot = Arc<Mutex<()>>;

/// One FIFO lock per key, created on demand and dropped once idle.
#[derive(Default)]
struct KeyedLocks {
    slots: StdMutex<HashMap<ReviewKey, Slot>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &ReviewKey) -> KeyGuard<'_> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = slot.clone().lock_owned().await;

        KeyGuard {
            locks: self,
            key: key.clone(),
            slot,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: ReviewKey,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // table + this guard: nobody else holds or waits on the slot
        let idle = Arc::strong_count(&self.slot) == 2;
        if idle && slots.get(&self.key).is_some_and(|s| Arc::ptr_eq(s, &self.slot)) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
