//! Lifecycle event plumbing.
//!
//! Each lane owns one unbounded mpsc channel; the dispatcher consumes them
//! centrally and re-emits every event on a single broadcast stream, tagged
//! with the lane index. Callers that need to await a job's outcome subscribe
//! and filter by id — `submit` never waits for completion.

use crate::job::JobRecord;

/// What happened to a job inside its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Queued,
    Started,
    Completed,
    Failed,
    TimedOut,
}

/// Event emitted by a lane on its own channel. Carries a snapshot of the
/// record at transition time.
#[derive(Debug, Clone)]
pub struct LaneEvent {
    pub kind: JobEventKind,
    pub job: JobRecord,
}

/// Unified stream re-emitted by the dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    /// A job lifecycle transition, tagged with the index of the lane it
    /// happened in.
    Job {
        lane: usize,
        kind: JobEventKind,
        job: JobRecord,
    },
    LaneAdded { lane: usize },
    LaneRemoved { lane: usize },
    ConcurrencyUpdated { concurrency: usize },
    AllPaused,
    AllResumed,
    Shutdown,
}

/// Capacity of the broadcast stream. A subscriber that lags further than this
/// loses oldest events; dispatcher correctness never depends on the stream.
pub(crate) const EVENT_STREAM_CAPACITY: usize = 1024;
