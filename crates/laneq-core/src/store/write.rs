//! Write operations: upsert (single and batched), cleanup delete.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::db::{millis, SqliteStore};
use crate::job::JobRecord;

/// `payload` and `created_at` are write-once: an update only touches the
/// mutable lifecycle columns.
const UPSERT_SQL: &str = r#"
    INSERT INTO jobs (
        id, payload, status, lane_index,
        created_at, started_at, completed_at, timeout_ms, error
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(id) DO UPDATE SET
        status = excluded.status,
        lane_index = excluded.lane_index,
        started_at = excluded.started_at,
        completed_at = excluded.completed_at,
        error = excluded.error
"#;

fn bind_upsert(
    job: &JobRecord,
) -> sqlx::query::Query<'static, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'static>> {
    sqlx::query(UPSERT_SQL)
        .bind(job.id.to_string())
        .bind(job.payload.to_string())
        .bind(job.status.as_str())
        .bind(job.lane_index as i64)
        .bind(millis(job.created_at))
        .bind(job.started_at.map(millis))
        .bind(job.completed_at.map(millis))
        .bind(job.timeout_ms as i64)
        .bind(job.error.clone())
}

impl SqliteStore {
    /// Create or update a single job row.
    pub async fn upsert(&self, job: &JobRecord) -> Result<()> {
        bind_upsert(job).execute(&self.pool).await?;
        Ok(())
    }

    /// Create or update a batch of job rows in one transaction. Either every
    /// row lands or none does.
    pub async fn batch_upsert(&self, jobs: &[JobRecord]) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            bind_upsert(job).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete rows in a terminal state whose completion timestamp is older
    /// than `cutoff`. Pending and running rows are never touched. Returns the
    /// number of rows removed.
    pub async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let r = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'timed_out')
              AND completed_at IS NOT NULL
              AND completed_at < ?1
            "#,
        )
        .bind(millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
