//! Read operations: recovery selects and listing.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::db::{from_millis, SqliteStore};
use crate::job::{JobId, JobRecord, JobStatus};

fn record_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let id_str: String = row.get("id");
    let payload_str: String = row.get("payload");
    let status_str: String = row.get("status");
    let lane_index: i64 = row.get("lane_index");
    let created_at: i64 = row.get("created_at");
    let started_at: Option<i64> = row.get("started_at");
    let completed_at: Option<i64> = row.get("completed_at");
    let timeout_ms: Option<i64> = row.get("timeout_ms");
    let error: Option<String> = row.get("error");

    Ok(JobRecord {
        id: Uuid::parse_str(&id_str)?,
        payload: serde_json::from_str(&payload_str)?,
        status: JobStatus::from_str(&status_str),
        lane_index: lane_index.max(0) as usize,
        created_at: from_millis(created_at),
        started_at: started_at.map(from_millis),
        completed_at: completed_at.map(from_millis),
        timeout_ms: timeout_ms.unwrap_or(0).max(0) as u64,
        error,
    })
}

impl SqliteStore {
    /// Every pending or running row, oldest first. Recovery input.
    pub async fn find_unfinished(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, status, lane_index,
                   created_at, started_at, completed_at, timeout_ms, error
            FROM jobs
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// All rows, newest first (CLI status listing).
    pub async fn list_all(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, status, lane_index,
                   created_at, started_at, completed_at, timeout_ms, error
            FROM jobs
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Fetch one row by id.
    pub async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, payload, status, lane_index,
                   created_at, started_at, completed_at, timeout_ms, error
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }
}
