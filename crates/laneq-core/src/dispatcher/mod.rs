//! Lane-set manager.
//!
//! Owns the ordered collection of lanes: least-loaded submission, lifecycle
//! routing via a job-id → lane index, dynamic resize and concurrency rebuild
//! (`resize.rs`), pause/resume/shutdown, and the unified event stream. Startup
//! recovery seeds lanes from the persistence layer before normal operation.

mod resize;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::event::{DispatcherEvent, LaneEvent, EVENT_STREAM_CAPACITY};
use crate::job::{JobId, JobRecord};
use crate::lane::{Lane, LaneStats, TimeoutFired};
use crate::persist::PersistenceAdapter;

/// Handle to the dispatcher. Cheap to clone; all clones share one lane set.
///
/// Public entrypoints serialize through a single mutex, so admission steps,
/// timer expiries and externally delivered completion signals interleave
/// without internal races. No await happens while the lock is held.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Mutex<LaneSet>>,
    events: broadcast::Sender<DispatcherEvent>,
    persist: Arc<PersistenceAdapter>,
    timeout_tx: mpsc::UnboundedSender<TimeoutFired>,
}

/// Lane collection plus routing state, behind the dispatcher mutex.
struct LaneSet {
    /// Active lanes; position is the lane index.
    lanes: Vec<Lane>,
    /// Retired lanes still finishing their running jobs. Admission is stopped
    /// and their pending queues were migrated when they left the active set.
    draining: Vec<Lane>,
    /// Job id → internal lane id. Replaces broadcasting completion signals to
    /// every lane: resolution is a single lookup.
    route: HashMap<JobId, u64>,
    next_lane_id: u64,
    concurrency: usize,
    default_timeout_ms: u64,
    shutdown: bool,
}

impl Dispatcher {
    /// Build a dispatcher with an empty lane set and start the persistence
    /// flush loop. Rejects a zero lane count or concurrency cap synchronously.
    pub fn new(
        config: &DispatcherConfig,
        persist: Arc<PersistenceAdapter>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_STREAM_CAPACITY);
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(LaneSet {
            lanes: Vec::with_capacity(config.lanes),
            draining: Vec::new(),
            route: HashMap::new(),
            next_lane_id: 0,
            concurrency: config.lane_concurrency,
            default_timeout_ms: config.default_timeout_ms,
            shutdown: false,
        }));

        {
            let mut set = inner.lock().unwrap();
            for index in 0..config.lanes {
                let lane =
                    set.make_lane(index, events.clone(), timeout_tx.clone(), persist.clone())?;
                set.lanes.push(lane);
            }
        }

        spawn_timeout_router(Arc::downgrade(&inner), timeout_rx);
        persist.start_flush(config.flush_interval_ms);

        Ok(Self {
            inner,
            events,
            persist,
            timeout_tx,
        })
    }

    /// Build a dispatcher and seed it with unfinished jobs recovered from
    /// storage. Jobs found running are forced back to pending (the previous
    /// process died mid-flight); stored lane indexes beyond the current lane
    /// count are remapped by modulo.
    pub async fn recover(
        config: &DispatcherConfig,
        persist: Arc<PersistenceAdapter>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let recovered = persist.recover(config.lanes).await?;
        let dispatcher = Self::new(config, persist)?;
        {
            let mut set = dispatcher.inner.lock().unwrap();
            let mut indexes: Vec<usize> = recovered.keys().copied().collect();
            indexes.sort_unstable();
            for index in indexes {
                let mut jobs = recovered[&index].clone();
                jobs.sort_by_key(|job| job.created_at);
                for job in jobs {
                    let lane_id = set.lanes[index].lane_id();
                    let job_id = job.id;
                    set.lanes[index].requeue(job);
                    set.route.insert(job_id, lane_id);
                }
            }
        }
        Ok(dispatcher)
    }

    /// Submit an opaque payload. The job lands on the lane with the smallest
    /// `pending + running` total (ties go to the lowest index) and the
    /// generated id is returned immediately; completion must be awaited via
    /// the event stream.
    pub fn submit(
        &self,
        payload: serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> Result<JobId, DispatchError> {
        let mut set = self.inner.lock().unwrap();
        if set.shutdown {
            return Err(DispatchError::ShutDown);
        }
        let index = set.least_loaded();
        let lane_id = set.lanes[index].lane_id();
        let id = set.lanes[index].submit(payload, timeout_ms);
        set.route.insert(id, lane_id);
        Ok(id)
    }

    /// Externally delivered success signal. Returns whether a running job was
    /// finalized; an unknown or already-terminal id is a safe no-op.
    pub fn complete(&self, id: JobId) -> bool {
        self.inner.lock().unwrap().resolve(id, None, true)
    }

    /// Externally delivered failure signal with optional error text. Returns
    /// whether a running job was finalized; unknown ids are a safe no-op.
    pub fn fail(&self, id: JobId, error: Option<String>) -> bool {
        self.inner.lock().unwrap().resolve(id, error, false)
    }

    /// Stop admission on every active lane. Running jobs are unaffected.
    pub fn pause_all(&self) {
        let mut set = self.inner.lock().unwrap();
        for lane in &mut set.lanes {
            lane.pause();
        }
        let _ = self.events.send(DispatcherEvent::AllPaused);
    }

    /// Resume admission on every active lane.
    pub fn resume_all(&self) {
        let mut set = self.inner.lock().unwrap();
        for lane in &mut set.lanes {
            lane.resume();
        }
        let _ = self.events.send(DispatcherEvent::AllResumed);
    }

    /// Pause one lane by index. Returns false if there is no such lane.
    pub fn pause_lane(&self, index: usize) -> bool {
        let mut set = self.inner.lock().unwrap();
        match set.lanes.get_mut(index) {
            Some(lane) => {
                lane.pause();
                true
            }
            None => false,
        }
    }

    /// Resume one lane by index. Returns false if there is no such lane.
    pub fn resume_lane(&self, index: usize) -> bool {
        let mut set = self.inner.lock().unwrap();
        match set.lanes.get_mut(index) {
            Some(lane) => {
                lane.resume();
                true
            }
            None => false,
        }
    }

    /// Permanently stop admission everywhere, then flush and stop the
    /// persistence layer. Jobs still running keep their timers; transitions
    /// after this point stay in memory and are recovered as unfinished on the
    /// next start.
    pub async fn shutdown_all(&self) {
        {
            let mut set = self.inner.lock().unwrap();
            set.shutdown = true;
            for lane in &mut set.lanes {
                lane.shutdown();
            }
            let _ = self.events.send(DispatcherEvent::Shutdown);
        }
        self.persist.shutdown().await;
    }

    /// Per-lane stats for the active set, in lane-index order.
    pub fn stats(&self) -> Vec<LaneStats> {
        let set = self.inner.lock().unwrap();
        set.lanes.iter().map(Lane::stats).collect()
    }

    /// Clones of every active lane's pending queue, in lane-index order.
    pub fn pending_snapshot(&self) -> Vec<Vec<JobRecord>> {
        let set = self.inner.lock().unwrap();
        set.lanes.iter().map(Lane::pending_snapshot).collect()
    }

    /// Subscribe to the unified lifecycle stream. A receiver that lags loses
    /// oldest events; correctness never depends on the stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.events.subscribe()
    }
}

impl LaneSet {
    /// Construct a lane wired into the event stream and timeout router.
    fn make_lane(
        &mut self,
        index: usize,
        stream: broadcast::Sender<DispatcherEvent>,
        timeout_tx: mpsc::UnboundedSender<TimeoutFired>,
        persist: Arc<PersistenceAdapter>,
    ) -> Result<Lane, DispatchError> {
        let id = self.next_lane_id;
        self.next_lane_id += 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        spawn_forwarder(index, events_rx, stream);
        Lane::new(
            id,
            index,
            self.concurrency,
            self.default_timeout_ms,
            events_tx,
            timeout_tx,
            persist,
        )
    }

    /// Deterministic left-to-right scan: smallest load wins, first occurrence
    /// on ties.
    fn least_loaded(&self) -> usize {
        let mut best = 0;
        let mut best_load = usize::MAX;
        for (index, lane) in self.lanes.iter().enumerate() {
            let load = lane.load();
            if load < best_load {
                best = index;
                best_load = load;
            }
        }
        best
    }

    /// Route a completion or failure signal to the owning lane, active or
    /// draining. Exactly one lane, if any, acts.
    fn resolve(&mut self, id: JobId, error: Option<String>, success: bool) -> bool {
        let Some(&lane_id) = self.route.get(&id) else {
            return false;
        };
        let mut stale = false;
        let acted = match self.lane_mut(lane_id) {
            Some(lane) => {
                if success {
                    lane.complete(id)
                } else {
                    lane.fail(id, error)
                }
            }
            None => {
                stale = true;
                false
            }
        };
        if stale || acted {
            self.route.remove(&id);
        }
        if acted {
            self.retire_drained();
        }
        acted
    }

    fn on_timeout(&mut self, fired: TimeoutFired) {
        let Some(lane) = self.lane_mut(fired.lane) else {
            return;
        };
        if lane.timeout(fired.job) {
            self.route.remove(&fired.job);
            self.retire_drained();
        }
    }

    fn lane_mut(&mut self, lane_id: u64) -> Option<&mut Lane> {
        self.lanes
            .iter_mut()
            .chain(self.draining.iter_mut())
            .find(|lane| lane.lane_id() == lane_id)
    }

    /// Drop retired lanes whose last running job has finished. Dropping a
    /// lane closes its event channel, which ends its forwarder task.
    fn retire_drained(&mut self) {
        self.draining.retain(|lane| !lane.is_drained());
    }

    /// Put an existing pending record back through least-loaded placement.
    fn submit_existing(&mut self, job: JobRecord) {
        let index = self.least_loaded();
        let lane_id = self.lanes[index].lane_id();
        let id = job.id;
        self.lanes[index].requeue(job);
        self.route.insert(id, lane_id);
    }
}

/// Forward one lane's events onto the unified stream, tagged with the lane
/// index. Exits when the lane is dropped.
fn spawn_forwarder(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<LaneEvent>,
    stream: broadcast::Sender<DispatcherEvent>,
) {
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let _ = stream.send(DispatcherEvent::Job {
                lane: index,
                kind: ev.kind,
                job: ev.job,
            });
        }
    });
}

/// Deliver timer expiries into the lane set. Holds only a weak reference so a
/// dropped dispatcher tears down cleanly.
fn spawn_timeout_router(
    weak: Weak<Mutex<LaneSet>>,
    mut rx: mpsc::UnboundedReceiver<TimeoutFired>,
) {
    tokio::spawn(async move {
        while let Some(fired) = rx.recv().await {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let mut set = inner.lock().unwrap();
            set.on_timeout(fired);
        }
    });
}
