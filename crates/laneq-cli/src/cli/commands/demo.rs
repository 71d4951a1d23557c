//! `laneq demo` – drive the dispatcher end to end against a throwaway store.
//!
//! A spawned task plays the external processor: it watches for `Started`
//! events and signals completion a moment later, the way a webhook would.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use laneq_core::config::DispatcherConfig;
use laneq_core::dispatcher::Dispatcher;
use laneq_core::event::{DispatcherEvent, JobEventKind};
use laneq_core::persist::PersistenceAdapter;
use laneq_core::store::SqliteStore;

pub async fn run_demo(
    cfg: &DispatcherConfig,
    jobs: usize,
    lanes: usize,
    concurrency: usize,
) -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::open_at(dir.path().join("jobs.db")).await?;
    let adapter = Arc::new(PersistenceAdapter::new(store, cfg.flush_batch_size));

    let demo_cfg = DispatcherConfig {
        lanes,
        lane_concurrency: concurrency,
        ..cfg.clone()
    };
    let dispatcher = Dispatcher::new(&demo_cfg, adapter)?;
    let mut rx = dispatcher.subscribe();

    let signaller = dispatcher.clone();
    let mut work_rx = dispatcher.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = work_rx.recv().await {
            if let DispatcherEvent::Job {
                kind: JobEventKind::Started,
                job,
                ..
            } = ev
            {
                let signaller = signaller.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    signaller.complete(job.id);
                });
            }
        }
    });

    for n in 0..jobs {
        dispatcher.submit(serde_json::json!({ "demo": n }), None)?;
    }
    println!("submitted {jobs} jobs across {lanes} lane(s), cap {concurrency}");

    let mut completed = 0;
    while completed < jobs {
        match rx.recv().await {
            Ok(DispatcherEvent::Job { lane, kind, job }) => {
                println!("lane {:<3} {:<10} {}", lane, kind_label(kind), job.id);
                if kind == JobEventKind::Completed {
                    completed += 1;
                }
            }
            Ok(_) => {}
            Err(err) => anyhow::bail!("event stream ended early: {err}"),
        }
    }

    dispatcher.shutdown_all().await;
    println!("all {jobs} jobs completed");
    Ok(())
}

fn kind_label(kind: JobEventKind) -> &'static str {
    match kind {
        JobEventKind::Queued => "queued",
        JobEventKind::Started => "started",
        JobEventKind::Completed => "completed",
        JobEventKind::Failed => "failed",
        JobEventKind::TimedOut => "timed_out",
    }
}
