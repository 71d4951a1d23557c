//! Persistence adapter: transition buffering, batched flush, recovery and
//! cleanup.
//!
//! Lifecycle transitions are buffered in memory keyed by job id; multiple
//! transitions for one id before the next flush collapse to the latest
//! (last-writer-wins), bounding write volume. The periodic flush drains up to
//! a batch of buffered transitions and persists them in one transaction.
//! In-memory lane state is authoritative: a failed flush is logged and
//! retried next cycle, never rolled back into the lanes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::job::{JobId, JobRecord, JobStatus};
use crate::store::SqliteStore;

pub struct PersistenceAdapter {
    store: SqliteStore,
    buffer: Mutex<HashMap<JobId, JobRecord>>,
    batch_size: usize,
    stop: Notify,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceAdapter {
    /// Wrap a store. The flush loop is started separately so tests can drive
    /// flushes by hand.
    pub fn new(store: SqliteStore, batch_size: usize) -> Self {
        Self {
            store,
            buffer: Mutex::new(HashMap::new()),
            batch_size: batch_size.max(1),
            stop: Notify::new(),
            flush_task: Mutex::new(None),
        }
    }

    /// Direct access to the underlying store (CLI listing, tests).
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Buffer one lifecycle transition. Called synchronously on every
    /// transition; an intermediate state superseded before the next flush
    /// never reaches storage.
    pub fn record_transition(&self, job: &JobRecord) {
        self.buffer.lock().unwrap().insert(job.id, job.clone());
    }

    /// Number of transitions currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Start the periodic flush loop. A second call is a no-op.
    pub fn start_flush(self: &Arc<Self>, interval_ms: u64) {
        let mut slot = self.flush_task.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let adapter = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = adapter.flush_batch().await {
                            tracing::warn!("transition flush failed (will retry): {err:#}");
                        }
                    }
                    _ = adapter.stop.notified() => break,
                }
            }
        }));
    }

    /// Drain up to one batch of buffered transitions and persist them as one
    /// atomic upsert. Transitions recorded after the batch is selected stay
    /// buffered for the next cycle. On failure the batch is re-buffered
    /// without clobbering anything recorded since selection.
    pub async fn flush_batch(&self) -> Result<usize> {
        let batch: Vec<JobRecord> = {
            let mut buffer = self.buffer.lock().unwrap();
            let ids: Vec<JobId> = buffer.keys().take(self.batch_size).copied().collect();
            ids.iter().filter_map(|id| buffer.remove(id)).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        match self.store.batch_upsert(&batch).await {
            Ok(()) => Ok(batch.len()),
            Err(err) => {
                let mut buffer = self.buffer.lock().unwrap();
                for job in batch {
                    buffer.entry(job.id).or_insert(job);
                }
                Err(err)
            }
        }
    }

    /// Flush everything buffered. Used at shutdown; gives up on a persistent
    /// storage failure rather than spinning.
    pub async fn flush_all(&self) {
        loop {
            match self.flush_batch().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!("final flush abandoned {} transitions: {err:#}", self.buffered());
                    break;
                }
            }
        }
    }

    /// Startup recovery, run once before the dispatcher begins admitting.
    ///
    /// Every persisted pending or running job is returned grouped by lane. A
    /// job found running means the previous process died mid-flight and no
    /// external actor still holds a handle on it, so it is downgraded to
    /// pending and the downgrade persisted synchronously before this returns.
    /// Stored lane indexes beyond `lane_count` remap via modulo, so recovery
    /// tolerates a shrunken topology.
    pub async fn recover(&self, lane_count: usize) -> Result<HashMap<usize, Vec<JobRecord>>> {
        anyhow::ensure!(lane_count > 0, "recover requires at least one lane");
        let unfinished = self.store.find_unfinished().await?;
        let mut downgraded = Vec::new();
        let mut by_lane: HashMap<usize, Vec<JobRecord>> = HashMap::new();
        for mut job in unfinished {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
                job.started_at = None;
                downgraded.push(job.clone());
            }
            job.lane_index %= lane_count;
            by_lane.entry(job.lane_index).or_default().push(job);
        }
        if !downgraded.is_empty() {
            self.store.batch_upsert(&downgraded).await?;
            tracing::info!(count = downgraded.len(), "downgraded mid-flight jobs to pending");
        }
        Ok(by_lane)
    }

    /// Delete terminal rows whose completion is older than `older_than`.
    /// Returns the number of rows removed.
    pub async fn cleanup(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        self.store.delete_terminal_before(cutoff).await
    }

    /// Stop the flush loop and force one last flush of everything buffered.
    pub async fn shutdown(&self) {
        self.stop.notify_one();
        let task = self.flush_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.flush_all().await;
    }
}
