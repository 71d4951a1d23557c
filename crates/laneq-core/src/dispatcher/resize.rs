//! Topology changes: lane-count resize and concurrency rebuild.
//!
//! Retired lanes are never torn down with work in flight. They leave the
//! active set immediately (admission stopped, pending migrated through the
//! normal submit path) and drain in the background: running jobs finish, fail
//! or time out through the routing index, and the lane is dropped once empty.

use crate::error::DispatchError;
use crate::event::DispatcherEvent;
use crate::job::JobRecord;
use crate::lane::Lane;

use super::Dispatcher;

impl Dispatcher {
    /// Grow or shrink the active lane set. Rejects zero.
    ///
    /// Growing appends freshly constructed lanes with the configured cap;
    /// existing lanes and their jobs are untouched. Shrinking retires lanes at
    /// index >= `new_count` and resubmits their pending jobs against the
    /// reduced set, so placement again follows least-loaded policy.
    pub fn resize(&self, new_count: usize) -> Result<(), DispatchError> {
        if new_count == 0 {
            return Err(DispatchError::InvalidLaneCount(0));
        }
        let mut set = self.inner.lock().unwrap();
        if set.shutdown {
            return Err(DispatchError::ShutDown);
        }

        let current = set.lanes.len();
        if new_count > current {
            for index in current..new_count {
                let lane = set.make_lane(
                    index,
                    self.events.clone(),
                    self.timeout_tx.clone(),
                    self.persist.clone(),
                )?;
                set.lanes.push(lane);
                let _ = self.events.send(DispatcherEvent::LaneAdded { lane: index });
            }
            tracing::info!(from = current, to = new_count, "lane set grown");
        } else if new_count < current {
            let removed = set.lanes.split_off(new_count);
            let migrated = set.retire(removed, Some(&self.events));
            for job in migrated {
                set.route.remove(&job.id);
                set.submit_existing(job);
            }
            tracing::info!(from = current, to = new_count, "lane set shrunk");
        }
        Ok(())
    }

    /// Rebuild every active lane at the same count with a new concurrency cap.
    /// Rejects zero. Pending jobs redistribute exactly as in a shrink; old
    /// lanes drain their running jobs before being dropped. Lanes added later
    /// use the new cap.
    pub fn update_concurrency(&self, new_cap: usize) -> Result<(), DispatchError> {
        if new_cap == 0 {
            return Err(DispatchError::InvalidConcurrency(0));
        }
        let mut set = self.inner.lock().unwrap();
        if set.shutdown {
            return Err(DispatchError::ShutDown);
        }

        set.concurrency = new_cap;
        let count = set.lanes.len();
        let old = std::mem::take(&mut set.lanes);
        // A rebuild is not a topology change: no lane-removed announcements,
        // just the concurrency-updated event below.
        let migrated = set.retire(old, None);
        for index in 0..count {
            let lane = set.make_lane(
                index,
                self.events.clone(),
                self.timeout_tx.clone(),
                self.persist.clone(),
            )?;
            set.lanes.push(lane);
        }
        for job in migrated {
            set.route.remove(&job.id);
            set.submit_existing(job);
        }
        let _ = self.events.send(DispatcherEvent::ConcurrencyUpdated {
            concurrency: new_cap,
        });
        tracing::info!(concurrency = new_cap, "lane concurrency updated");
        Ok(())
    }
}

impl super::LaneSet {
    /// Shut down the given lanes, collect their pending jobs in FIFO order,
    /// and keep any lane with work in flight on the draining list. When
    /// `events` is given, one `LaneRemoved` is emitted per lane as it leaves
    /// the active set.
    fn retire(
        &mut self,
        lanes: Vec<Lane>,
        events: Option<&tokio::sync::broadcast::Sender<DispatcherEvent>>,
    ) -> Vec<JobRecord> {
        let mut migrated = Vec::new();
        for mut lane in lanes {
            lane.shutdown();
            migrated.extend(lane.take_pending());
            if let Some(events) = events {
                let _ = events.send(DispatcherEvent::LaneRemoved { lane: lane.index() });
            }
            if !lane.is_drained() {
                self.draining.push(lane);
            }
        }
        migrated
    }
}
