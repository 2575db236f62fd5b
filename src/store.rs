use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::{ReviewKey, ReviewState};

/// Keyed storage for review records.
///
/// `upsert` is a compare-and-swap on the record's version:
/// - `expected_version == None` inserts and fails with [`StoreError::Conflict`]
///   if a row for the key already exists;
/// - `expected_version == Some(v)` replaces the whole row only while its
///   stored version is still `v`.
///
/// The returned state carries the newly assigned version.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn get(&self, key: &ReviewKey) -> Result<Option<ReviewState>, StoreError>;
    async fn upsert(&self, state: &ReviewState, expected_version: Option<i64>) -> Result<ReviewState, StoreError>;
}

/// In-process store, used for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<ReviewKey, ReviewState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn get(&self, key: &ReviewKey) -> Result<Option<ReviewState>, StoreError> {
        Ok(self.rows.lock().await.get(key).cloned())
    }

    async fn upsert(&self, state: &ReviewState, expected_version: Option<i64>) -> Result<ReviewState, StoreError> {
        let key = state.key();
        let mut rows = self.rows.lock().await;

        let current = rows.get(&key).map(|r| r.version);
        if current != expected_version {
            return Err(StoreError::Conflict { key, expected: expected_version });
        }

        let mut stored = state.clone();
        stored.version = expected_version.unwrap_or(0) + 1;
        rows.insert(key, stored.clone());
        Ok(stored)
    }
}
