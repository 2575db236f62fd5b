use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
    ConnectOptions, Pool, Row, Sqlite,
};
use std::str::FromStr;

use crate::error::StoreError;
use crate::models::{ReviewKey, ReviewState};
use crate::store::ReviewStore;

/// A `review_state` row as stored, before range checks.
struct ReviewRow {
    learner_id: String,
    question_id: String,
    repetition: i64,
    interval: i64,
    easiness: f64,
    due_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ReviewRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ReviewRow {
            learner_id: row.try_get("learner_id")?,
            question_id: row.try_get("question_id")?,
            repetition: row.try_get("repetition")?,
            interval: row.try_get("interval")?,
            easiness: row.try_get("easiness")?,
            due_at: row.try_get("due_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<ReviewRow> for ReviewState {
    type Error = StoreError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        let corrupt = |what: String| StoreError::Corrupt(format!("{}/{}: {}", row.learner_id, row.question_id, what));

        let repetition = u32::try_from(row.repetition)
            .map_err(|_| corrupt(format!("repetition {} out of range", row.repetition)))?;
        let interval = u32::try_from(row.interval)
            .map_err(|_| corrupt(format!("interval {} out of range", row.interval)))?;
        if !row.easiness.is_finite() {
            return Err(corrupt(format!("easiness {} is not a number", row.easiness)));
        }

        Ok(ReviewState {
            learner_id: row.learner_id,
            question_id: row.question_id,
            repetition,
            interval,
            easiness: row.easiness,
            due_at: row.due_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// SQLite-backed review store.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options).await?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Single-connection in-memory database. Every pooled connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(log::LevelFilter::Trace);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS review_state (
                learner_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                repetition INTEGER NOT NULL DEFAULT 0,
                interval INTEGER NOT NULL DEFAULT 1,
                easiness REAL NOT NULL DEFAULT 2.5,
                due_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (learner_id, question_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReviewStore for Db {
    async fn get(&self, key: &ReviewKey) -> Result<Option<ReviewState>, StoreError> {
        let row = sqlx::query_as::<_, ReviewRow>(
            "SELECT * FROM review_state WHERE learner_id = ? AND question_id = ?",
        )
        .bind(&key.learner_id)
        .bind(&key.question_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReviewState::try_from).transpose()
    }

    async fn upsert(&self, state: &ReviewState, expected_version: Option<i64>) -> Result<ReviewState, StoreError> {
        let new_version = expected_version.unwrap_or(0) + 1;

        let result = match expected_version {
            // A racing first response for the same key hits the primary key.
            None => sqlx::query(
                r#"
                INSERT INTO review_state
                    (learner_id, question_id, repetition, interval, easiness, due_at, updated_at, version)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (learner_id, question_id) DO NOTHING
                "#,
            )
            .bind(&state.learner_id)
            .bind(&state.question_id)
            .bind(i64::from(state.repetition))
            .bind(i64::from(state.interval))
            .bind(state.easiness)
            .bind(state.due_at)
            .bind(state.updated_at)
            .bind(new_version)
            .execute(&self.pool)
            .await?,
            Some(expected) => sqlx::query(
                r#"
                UPDATE review_state
                SET repetition = ?, interval = ?, easiness = ?, due_at = ?, updated_at = ?, version = ?
                WHERE learner_id = ? AND question_id = ? AND version = ?
                "#,
            )
            .bind(i64::from(state.repetition))
            .bind(i64::from(state.interval))
            .bind(state.easiness)
            .bind(state.due_at)
            .bind(state.updated_at)
            .bind(new_version)
            .bind(&state.learner_id)
            .bind(&state.question_id)
            .bind(expected)
            .execute(&self.pool)
            .await?,
        };

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict {
                key: state.key(),
                expected: expected_version,
            });
        }

        let mut stored = state.clone();
        stored.version = new_version;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn key() -> ReviewKey {
        ReviewKey::new("learner-a", "question-7").unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn missing_row_reads_as_none() {
        let db = Db::in_memory().await.unwrap();
        assert!(db.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_then_read_back() {
        let db = Db::in_memory().await.unwrap();
        let mut state = ReviewState::seed(&key(), at());
        state.repetition = 2;
        state.interval = 6;
        state.easiness = 2.7;
        state.due_at = at() + Duration::days(6);

        let saved = db.upsert(&state, None).await.unwrap();
        assert_eq!(saved.version, 1);

        let loaded = db.get(&key()).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let db = Db::in_memory().await.unwrap();
        let state = ReviewState::seed(&key(), at());
        db.upsert(&state, None).await.unwrap();

        let err = db.upsert(&state, None).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn replace_checks_version() {
        let db = Db::in_memory().await.unwrap();
        let v1 = db.upsert(&ReviewState::seed(&key(), at()), None).await.unwrap();

        let mut next = v1.clone();
        next.repetition = 1;
        let v2 = db.upsert(&next, Some(v1.version)).await.unwrap();
        assert_eq!(v2.version, 2);

        let err = db.upsert(&next, Some(v1.version)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(db.get(&key()).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn negative_interval_reads_as_corrupt() {
        let db = Db::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO review_state (learner_id, question_id, repetition, interval, easiness, due_at, updated_at, version)
             VALUES (?, ?, 2, -3, 2.5, ?, ?, 1)",
        )
        .bind(&key().learner_id)
        .bind(&key().question_id)
        .bind(at())
        .bind(at())
        .execute(&db.pool)
        .await
        .unwrap();

        match db.get(&key()).await {
            Err(StoreError::Corrupt(msg)) => assert!(msg.contains("interval -3"), "message was {}", msg),
            other => panic!("expected corrupt record, got {:?}", other),
        }
    }
}
