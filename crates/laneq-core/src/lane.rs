//! A single FIFO processing lane bounded by a concurrency cap.
//!
//! Admission is event-driven: it runs on submit, on finalize, and on resume,
//! never on a clock. While a slot is free and pending work exists, the head of
//! the queue is promoted to running, a timeout timer is armed, and a `Started`
//! event is emitted for the external processor to pick up. The terminal
//! transition arrives later via `complete`/`fail`, or from the timer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::DispatchError;
use crate::event::{JobEventKind, LaneEvent};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::persist::PersistenceAdapter;

/// Message sent by an armed timeout timer back to the dispatcher's router.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutFired {
    pub lane: u64,
    pub job: JobId,
}

/// Point-in-time counters for one lane, in lane-index order in
/// `Dispatcher::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStats {
    pub index: usize,
    pub pending: usize,
    pub running: usize,
    pub concurrency: usize,
    pub active: bool,
    pub paused: bool,
}

struct RunningJob {
    record: JobRecord,
    timer: AbortHandle,
}

pub(crate) struct Lane {
    /// Internal identity, unique for the dispatcher's lifetime. Routing uses
    /// this, never the index, so a draining lane can coexist with an active
    /// lane at the same position.
    id: u64,
    index: usize,
    concurrency: usize,
    default_timeout_ms: u64,
    pending: VecDeque<JobRecord>,
    running: HashMap<JobId, RunningJob>,
    paused: bool,
    active: bool,
    events: mpsc::UnboundedSender<LaneEvent>,
    timeouts: mpsc::UnboundedSender<TimeoutFired>,
    persist: Arc<PersistenceAdapter>,
}

impl Lane {
    /// Rejects a zero concurrency cap synchronously.
    pub fn new(
        id: u64,
        index: usize,
        concurrency: usize,
        default_timeout_ms: u64,
        events: mpsc::UnboundedSender<LaneEvent>,
        timeouts: mpsc::UnboundedSender<TimeoutFired>,
        persist: Arc<PersistenceAdapter>,
    ) -> Result<Self, DispatchError> {
        if concurrency == 0 {
            return Err(DispatchError::InvalidConcurrency(0));
        }
        Ok(Self {
            id,
            index,
            concurrency,
            default_timeout_ms,
            pending: VecDeque::new(),
            running: HashMap::new(),
            paused: false,
            active: true,
            events,
            timeouts,
            persist,
        })
    }

    pub fn lane_id(&self) -> u64 {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Enqueue a new pending job at the tail. The id is generated here and
    /// returned before any processing begins.
    pub fn submit(&mut self, payload: serde_json::Value, timeout_ms: Option<u64>) -> JobId {
        let timeout = timeout_ms.unwrap_or(self.default_timeout_ms);
        let record = JobRecord::new(payload, self.index, timeout);
        let id = record.id;
        self.persist.record_transition(&record);
        self.emit(JobEventKind::Queued, record.clone());
        self.pending.push_back(record);
        self.admit();
        id
    }

    /// Re-enqueue an existing pending record (recovery seeding or migration
    /// off a retired lane). Id, payload and created_at are preserved; only the
    /// lane index is re-stamped.
    pub fn requeue(&mut self, mut record: JobRecord) {
        record.lane_index = self.index;
        self.persist.record_transition(&record);
        self.emit(JobEventKind::Queued, record.clone());
        self.pending.push_back(record);
        self.admit();
    }

    /// Finalize a running job as completed. Safe no-op if this lane does not
    /// currently have `id` running.
    pub fn complete(&mut self, id: JobId) -> bool {
        self.finalize(id, JobStatus::Completed, None)
    }

    /// Finalize a running job as failed, capturing the optional error text.
    /// Safe no-op if this lane does not currently have `id` running.
    pub fn fail(&mut self, id: JobId, error: Option<String>) -> bool {
        self.finalize(id, JobStatus::Failed, error)
    }

    /// Timer expiry. Timed-out is a terminal state distinct from failure; no
    /// error text is recorded.
    pub fn timeout(&mut self, id: JobId) -> bool {
        self.finalize(id, JobStatus::TimedOut, None)
    }

    /// Stop promoting pending jobs. Running jobs are unaffected.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume admission. No effect on a lane that has been shut down.
    pub fn resume(&mut self) {
        if !self.active {
            return;
        }
        self.paused = false;
        self.admit();
    }

    /// Permanently stop admission. There is no resume after this.
    pub fn shutdown(&mut self) {
        self.active = false;
    }

    pub fn pending_snapshot(&self) -> Vec<JobRecord> {
        self.pending.iter().cloned().collect()
    }

    /// Drain the pending queue in FIFO order (used when the lane is retired).
    pub fn take_pending(&mut self) -> Vec<JobRecord> {
        self.pending.drain(..).collect()
    }

    pub fn stats(&self) -> LaneStats {
        LaneStats {
            index: self.index,
            pending: self.pending.len(),
            running: self.running.len(),
            concurrency: self.concurrency,
            active: self.active,
            paused: self.paused,
        }
    }

    /// Queue pressure used by least-loaded placement.
    pub fn load(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    /// True once no job is running here (a retired lane can be dropped).
    pub fn is_drained(&self) -> bool {
        self.running.is_empty()
    }

    /// Promote pending jobs while capacity allows. Runs on submit, finalize
    /// and resume.
    fn admit(&mut self) {
        while self.active && !self.paused && self.running.len() < self.concurrency {
            let Some(mut record) = self.pending.pop_front() else {
                break;
            };
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
            let timer = self.arm_timeout(record.id, record.timeout_ms);
            self.persist.record_transition(&record);
            self.emit(JobEventKind::Started, record.clone());
            tracing::debug!(job = %record.id, lane = self.index, "job started");
            self.running.insert(record.id, RunningJob { record, timer });
        }
    }

    fn finalize(&mut self, id: JobId, status: JobStatus, error: Option<String>) -> bool {
        let Some(mut run) = self.running.remove(&id) else {
            return false;
        };
        run.timer.abort();
        run.record.status = status;
        run.record.completed_at = Some(Utc::now());
        run.record.error = error;
        self.persist.record_transition(&run.record);
        let kind = match status {
            JobStatus::Completed => JobEventKind::Completed,
            JobStatus::TimedOut => JobEventKind::TimedOut,
            _ => JobEventKind::Failed,
        };
        tracing::debug!(job = %id, lane = self.index, status = %status, "job finalized");
        self.emit(kind, run.record);
        self.admit();
        true
    }

    /// Arm a one-shot timer that reports expiry to the dispatcher's router.
    /// The handle is aborted on finalize, so a completed job's timer never
    /// fires.
    fn arm_timeout(&self, job: JobId, timeout_ms: u64) -> AbortHandle {
        let tx = self.timeouts.clone();
        let lane = self.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = tx.send(TimeoutFired { lane, job });
        });
        handle.abort_handle()
    }

    fn emit(&self, kind: JobEventKind, job: JobRecord) {
        let _ = self.events.send(LaneEvent { kind, job });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LaneEvent;
    use serde_json::json;

    async fn test_lane(
        concurrency: usize,
    ) -> (
        Lane,
        mpsc::UnboundedReceiver<LaneEvent>,
        mpsc::UnboundedReceiver<TimeoutFired>,
    ) {
        let store = crate::store::db::open_memory().await.unwrap();
        let persist = Arc::new(PersistenceAdapter::new(store, 64));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let lane = Lane::new(0, 0, concurrency, 30_000, events_tx, timeout_tx, persist).unwrap();
        (lane, events_rx, timeout_rx)
    }

    #[tokio::test]
    async fn zero_concurrency_rejected() {
        let store = crate::store::db::open_memory().await.unwrap();
        let persist = Arc::new(PersistenceAdapter::new(store, 64));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (timeout_tx, _timeout_rx) = mpsc::unbounded_channel();
        let err = Lane::new(0, 0, 0, 30_000, events_tx, timeout_tx, persist).err();
        assert!(matches!(err, Some(DispatchError::InvalidConcurrency(0))));
    }

    #[tokio::test]
    async fn running_never_exceeds_cap() {
        let (mut lane, _events, _timeouts) = test_lane(2).await;
        for n in 0..5 {
            lane.submit(json!({ "n": n }), None);
        }
        let stats = lane.stats();
        assert_eq!(stats.running, 2);
        assert_eq!(stats.pending, 3);
    }

    #[tokio::test]
    async fn fifo_promotion_order() {
        let (mut lane, mut events, _timeouts) = test_lane(1).await;
        let a = lane.submit(json!("a"), None);
        let b = lane.submit(json!("b"), None);
        let c = lane.submit(json!("c"), None);

        // a queued, a started, b queued, c queued so far.
        assert!(lane.complete(a));
        assert!(lane.complete(b));
        assert!(lane.complete(c));

        let started: Vec<JobId> = drain_events(&mut events)
            .into_iter()
            .filter(|e| e.kind == JobEventKind::Started)
            .map(|e| e.job.id)
            .collect();
        assert_eq!(started, vec![a, b, c]);
    }

    #[tokio::test]
    async fn finalize_frees_slot_and_admits_next() {
        let (mut lane, _events, _timeouts) = test_lane(1).await;
        let first = lane.submit(json!(1), None);
        lane.submit(json!(2), None);
        assert_eq!(lane.stats().pending, 1);
        assert!(lane.complete(first));
        let stats = lane.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.running, 1);
    }

    #[tokio::test]
    async fn complete_unknown_id_is_noop() {
        let (mut lane, _events, _timeouts) = test_lane(1).await;
        lane.submit(json!(1), None);
        let before = lane.stats();
        assert!(!lane.complete(uuid::Uuid::new_v4()));
        assert!(!lane.fail(uuid::Uuid::new_v4(), Some("x".into())));
        assert_eq!(lane.stats(), before);
    }

    #[tokio::test]
    async fn pause_blocks_admission_resume_restores_it() {
        let (mut lane, _events, _timeouts) = test_lane(2).await;
        lane.pause();
        lane.submit(json!(1), None);
        assert_eq!(lane.stats().running, 0);
        assert_eq!(lane.stats().pending, 1);
        lane.resume();
        assert_eq!(lane.stats().running, 1);
        assert_eq!(lane.stats().pending, 0);
    }

    #[tokio::test]
    async fn pause_leaves_running_jobs_alone() {
        let (mut lane, _events, _timeouts) = test_lane(1).await;
        let id = lane.submit(json!(1), None);
        lane.pause();
        assert_eq!(lane.stats().running, 1);
        assert!(lane.complete(id));
    }

    #[tokio::test]
    async fn shutdown_is_terminal() {
        let (mut lane, _events, _timeouts) = test_lane(1).await;
        lane.shutdown();
        lane.submit(json!(1), None);
        assert_eq!(lane.stats().running, 0);
        lane.resume();
        assert_eq!(lane.stats().running, 0);
        assert!(!lane.stats().active);
    }

    #[tokio::test]
    async fn timer_fires_for_stalled_job() {
        let (mut lane, mut events, mut timeouts) = test_lane(1).await;
        // Pause the clock only after the store's async open; a clock paused
        // for the whole test trips the sqlx pool's acquire timeout.
        tokio::time::pause();
        let id = lane.submit(json!(1), Some(50));
        let fired = timeouts.recv().await.expect("timer message");
        assert_eq!(fired.job, id);
        assert!(lane.timeout(fired.job));
        let last = drain_events(&mut events).pop().unwrap();
        assert_eq!(last.kind, JobEventKind::TimedOut);
        assert_eq!(last.job.status, JobStatus::TimedOut);
        assert!(last.job.completed_at.is_some());
        assert!(last.job.error.is_none());
    }

    #[tokio::test]
    async fn completed_job_timer_never_fires() {
        let (mut lane, _events, mut timeouts) = test_lane(1).await;
        // Pause the clock only after the store's async open; a clock paused
        // for the whole test trips the sqlx pool's acquire timeout.
        tokio::time::pause();
        let id = lane.submit(json!(1), Some(50));
        assert!(lane.complete(id));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(timeouts.try_recv().is_err());
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<LaneEvent>) -> Vec<LaneEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }
}
