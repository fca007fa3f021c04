//! Background janitors driven through the toolkit

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{sqlite_connection, toolkit, toolkit_with, MockState};
use dbtoolkit_core::cache::Cache;
use dbtoolkit_core::scheduler::{
    Cadence, InMemoryJobStore, JobRunner, LoopState, ScheduledJob,
};
use dbtoolkit_core::{CoreConfig, Result};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingRunner {
    runs: AtomicUsize,
    jobs: Mutex<Vec<String>>,
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn run(&self, job: &ScheduledJob) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job.id.clone());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_due_job_runs_once_within_one_tick() {
    let state = MockState::new();
    let toolkit = toolkit(&state);

    let store = Arc::new(InMemoryJobStore::new());
    store.upsert(ScheduledJob::new(
        "nightly",
        "c1",
        "Nightly backup",
        Cadence::Daily,
        Some(Utc::now() - chrono::Duration::minutes(5)),
    ));
    let mut disabled = ScheduledJob::new(
        "paused",
        "c1",
        "Paused backup",
        Cadence::Daily,
        Some(Utc::now() - chrono::Duration::minutes(5)),
    );
    disabled.enabled = false;
    store.upsert(disabled);

    let runner = Arc::new(RecordingRunner::default());
    toolkit
        .spawn_background(store.clone(), runner.clone())
        .unwrap();
    assert!(toolkit.spawn_background(store.clone(), runner.clone()).is_err());

    // one base interval (60s) later the job has run
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    let job = store.get("nightly").unwrap();
    let last_run = job.last_run.unwrap();
    assert_eq!(job.next_due, Some(last_run + chrono::Duration::days(1)));

    // later ticks do not run it again
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    assert_eq!(*runner.jobs.lock().unwrap(), vec!["nightly".to_string()]);
    assert!(store.get("paused").unwrap().last_run.is_none());

    let stats = toolkit.scheduler_stats();
    assert!(stats.tasks["job_scheduler"].executions >= 2);
    assert_eq!(stats.loops["job_scheduler"], LoopState::Sleeping);

    toolkit.shutdown().await;
    let stats = toolkit.scheduler_stats();
    assert_eq!(stats.loops.len(), 2);
    assert!(stats.loops.values().all(|s| *s == LoopState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_history_janitor_cleans_expired_metadata() {
    let state = MockState::new();
    let mut config = CoreConfig::default();
    config.scheduler.history_base_interval_seconds = 600;
    let toolkit = toolkit_with(&state, config);
    toolkit.connect(&sqlite_connection("c1"), None).await.unwrap();

    toolkit
        .caches()
        .schema()
        .set("c1:schemas".into(), json!(["main"]), Some(Duration::ZERO));
    toolkit
        .caches()
        .schema()
        .set("c1:tables:main".into(), json!(["users"]), None);

    toolkit
        .spawn_background(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(RecordingRunner::default()),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_secs(601)).await;

    assert_eq!(toolkit.caches().schema().len(), 1);
    let stats = toolkit.scheduler_stats();
    assert_eq!(stats.tasks["history_cleanup"].executions, 1);
    assert_eq!(stats.tasks["history_cleanup"].total_items, 1);

    toolkit.shutdown().await;
    assert_eq!(toolkit.registry().connection_count(), 0);
}
