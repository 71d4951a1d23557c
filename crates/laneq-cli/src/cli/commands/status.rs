//! `laneq status` – show every job in the durable store.

use anyhow::Result;
use laneq_core::store::SqliteStore;

pub async fn run_status() -> Result<()> {
    let store = SqliteStore::open_default().await?;
    let jobs = store.list_all().await?;
    if jobs.is_empty() {
        println!("No jobs in store.");
        return Ok(());
    }

    println!(
        "{:<36} {:<10} {:<5} {:<20} {}",
        "ID", "STATUS", "LANE", "CREATED", "ERROR"
    );
    for job in jobs {
        println!(
            "{:<36} {:<10} {:<5} {:<20} {}",
            job.id,
            job.status.as_str(),
            job.lane_index,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
