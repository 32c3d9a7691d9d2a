//! Data Access Layer
//!
//! A PostgreSQL-backed `ProgressStore`, selected when `PROGRESS_STORE` is a database URL.
//! Each participant is one row of `interview_progress`.

use anyhow::Result;
use async_trait::async_trait;
use narra_core::progress::{ParticipantProgress, ProgressMap, ProgressStore, StoreError};
use sqlx::{PgPool, types::Json};

/// A wrapper around the `PgPool` that stores interview progress.
#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const UPSERT_PROGRESS: &str = "INSERT INTO interview_progress (identity, asked_questions, updated_at) \
     VALUES ($1, $2, now()) \
     ON CONFLICT (identity) DO UPDATE \
     SET asked_questions = EXCLUDED.asked_questions, updated_at = now()";

fn rows_to_map(rows: Vec<(String, Json<Vec<String>>)>) -> ProgressMap {
    rows.into_iter()
        .map(|(identity, Json(asked))| {
            (
                identity,
                ParticipantProgress {
                    asked_questions: asked.into_iter().collect(),
                },
            )
        })
        .collect()
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn try_load(&self) -> Result<ProgressMap, StoreError> {
        let rows: Vec<(String, Json<Vec<String>>)> =
            sqlx::query_as("SELECT identity, asked_questions FROM interview_progress")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        Ok(rows_to_map(rows))
    }

    /// Upserts every participant in one transaction. Rows for identities missing from
    /// `progress` are left alone.
    async fn save(&self, progress: &ProgressMap) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for (identity, entry) in progress {
            let asked: Vec<String> = entry.asked_questions.iter().cloned().collect();
            sqlx::query(UPSERT_PROGRESS)
                .bind(identity.as_str())
                .bind(Json(asked))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_to_map() {
        let rows = vec![
            (
                "bob".to_string(),
                Json(vec!["Q2".to_string(), "Q1".to_string(), "Q1".to_string()]),
            ),
            ("alice".to_string(), Json(vec![])),
        ];

        let map = rows_to_map(rows);

        assert_eq!(map.len(), 2);
        assert_eq!(
            map["bob"].asked_questions.iter().collect::<Vec<_>>(),
            vec!["Q1", "Q2"]
        );
        assert!(map["alice"].asked_questions.is_empty());
    }

    #[test]
    fn test_save_never_deletes_other_rows() {
        assert!(UPSERT_PROGRESS.contains("ON CONFLICT (identity) DO UPDATE"));
        assert!(!UPSERT_PROGRESS.to_uppercase().contains("DELETE"));
    }

    #[test]
    fn test_backend_error_is_wrapped() {
        let err = backend(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
