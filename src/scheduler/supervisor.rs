//! Supervised background loops
//!
//! Each janitor runs in its own task: sleep, run one iteration, record the
//! outcome, compute the next interval. A failing or panicking iteration is
//! logged and followed by the janitor's backoff interval; only cancellation
//! ends a loop.

use super::activity::{ActivityTracker, TaskStats};
use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A periodic maintenance task
#[async_trait]
pub trait Janitor: Send + Sync + 'static {
    /// Name used in logs and statistics
    fn name(&self) -> &str;

    /// Delay before the first iteration
    async fn initial_interval(&self) -> Duration;

    /// Run one iteration, returning the number of items processed
    async fn run_once(&self) -> Result<usize>;

    /// Delay after a successful iteration
    async fn next_interval(&self) -> Result<Duration>;

    /// Delay after a failed iteration
    fn backoff_interval(&self) -> Duration;
}

/// Observable state of one loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Sleeping,
    Running,
    BackoffSleeping,
    Stopped,
}

/// Snapshot for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub is_idle: bool,
    pub seconds_since_activity: u64,
    pub tasks: BTreeMap<String, TaskStats>,
    pub loops: BTreeMap<String, LoopState>,
}

struct LoopHandle {
    name: String,
    state: watch::Receiver<LoopState>,
    task: JoinHandle<()>,
    joined: bool,
}

/// Owns the background loops and their shared cancellation token
pub struct JanitorSupervisor {
    activity: Arc<ActivityTracker>,
    cancel: CancellationToken,
    loops: Mutex<Vec<LoopHandle>>,
}

impl JanitorSupervisor {
    pub fn new(activity: Arc<ActivityTracker>) -> Self {
        Self {
            activity,
            cancel: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    /// Start a loop for `janitor`. Returns a receiver of its state.
    pub fn spawn(&self, janitor: Arc<dyn Janitor>) -> watch::Receiver<LoopState> {
        let (tx, rx) = watch::channel(LoopState::Sleeping);
        let name = janitor.name().to_string();
        let task = tokio::spawn(run_loop(
            janitor,
            Arc::clone(&self.activity),
            tx,
            self.cancel.child_token(),
        ));

        if let Ok(mut loops) = self.loops.lock() {
            loops.push(LoopHandle {
                name,
                state: rx.clone(),
                task,
                joined: false,
            });
        }
        rx
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .loops
                .lock()
                .map(|loops| loops.iter().any(|l| !l.task.is_finished()))
                .unwrap_or(false)
    }

    /// Stop every loop and wait for it to finish. An iteration in progress
    /// runs to completion first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut loops = match self.loops.lock() {
            Ok(mut loops) => std::mem::take(&mut *loops),
            Err(_) => return,
        };

        for handle in loops.iter_mut().filter(|handle| !handle.joined) {
            handle.joined = true;
            if let Err(e) = (&mut handle.task).await {
                log::error!("Background task '{}' ended abnormally: {}", handle.name, e);
            }
        }

        // keep finished loops around so their final state stays observable
        if let Ok(mut current) = self.loops.lock() {
            current.extend(loops);
        }
        log::info!("Background scheduler stopped");
    }

    pub fn stats(&self) -> SchedulerStats {
        let loops = self
            .loops
            .lock()
            .map(|loops| {
                loops
                    .iter()
                    .map(|l| (l.name.clone(), *l.state.borrow()))
                    .collect()
            })
            .unwrap_or_default();

        SchedulerStats {
            is_idle: self.activity.is_idle(),
            seconds_since_activity: self.activity.since_last_activity().as_secs(),
            tasks: self.activity.task_stats(),
            loops,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_loop(
    janitor: Arc<dyn Janitor>,
    activity: Arc<ActivityTracker>,
    state: watch::Sender<LoopState>,
    cancel: CancellationToken,
) {
    let name = janitor.name().to_string();
    let mut interval = janitor.initial_interval().await;
    log::info!("Background task '{}' started (first run in {:?})", name, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        state.send_replace(LoopState::Running);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(janitor.run_once()).catch_unwind().await;
        let elapsed = started.elapsed();

        let failure = match outcome {
            Ok(Ok(items)) => {
                activity.record_task(&name, elapsed, items);
                if items > 0 {
                    log::info!("Task '{}' processed {} items in {:?}", name, items, elapsed);
                } else {
                    log::debug!("Task '{}' had nothing to do", name);
                }
                match AssertUnwindSafe(janitor.next_interval()).catch_unwind().await {
                    Ok(Ok(next)) => {
                        state.send_replace(LoopState::Sleeping);
                        interval = next;
                        None
                    }
                    Ok(Err(e)) => Some(format!("interval computation failed: {}", e)),
                    Err(panic) => Some(format!(
                        "interval computation panicked: {}",
                        panic_message(panic.as_ref())
                    )),
                }
            }
            Ok(Err(e)) => {
                activity.record_task_error(&name, elapsed);
                Some(e.to_string())
            }
            Err(panic) => {
                activity.record_task_error(&name, elapsed);
                Some(format!("panicked: {}", panic_message(panic.as_ref())))
            }
        };

        if let Some(reason) = failure {
            interval = janitor.backoff_interval();
            log::error!(
                "Error in '{}' task: {}; retrying in {:?}",
                name,
                reason,
                interval
            );
            state.send_replace(LoopState::BackoffSleeping);
        } else {
            log::debug!("Task '{}' next run in {:?}", name, interval);
        }
    }

    state.send_replace(LoopState::Stopped);
    log::info!("Background task '{}' stopped", name);
}
