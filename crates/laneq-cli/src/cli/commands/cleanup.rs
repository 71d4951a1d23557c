//! `laneq cleanup` – purge finished jobs older than a cutoff.

use std::time::Duration;

use anyhow::Result;
use laneq_core::persist::PersistenceAdapter;
use laneq_core::store::SqliteStore;

pub async fn run_cleanup(days: u64) -> Result<()> {
    let store = SqliteStore::open_default().await?;
    let adapter = PersistenceAdapter::new(store, 64);
    let removed = adapter
        .cleanup(Duration::from_secs(days * 24 * 60 * 60))
        .await?;
    println!("Removed {removed} finished job(s) older than {days} day(s).");
    Ok(())
}
