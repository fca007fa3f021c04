//! Activity tracking and per-task execution statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Execution statistics of one background task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub executions: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
    pub total_items: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl TaskStats {
    pub fn record_success(&mut self, duration_ms: u64, items: u64) {
        self.executions += 1;
        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);
        self.total_items = self.total_items.saturating_add(items);
        self.last_execution = Some(Utc::now());
    }

    pub fn record_error(&mut self, duration_ms: u64) {
        self.errors += 1;
        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);
        self.last_execution = Some(Utc::now());
    }

    pub fn avg_duration_ms(&self) -> f64 {
        let runs = self.executions + self.errors;
        if runs == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / runs as f64
        }
    }
}

/// Tracks user activity to stretch background intervals while idle
pub struct ActivityTracker {
    last_activity: Mutex<Instant>,
    window: Duration,
    tasks: Mutex<BTreeMap<String, TaskStats>>,
}

impl ActivityTracker {
    /// `window` is the trailing period without activity after which the
    /// system counts as idle. A new tracker starts out active.
    pub fn new(window: Duration) -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
            window,
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record user activity
    pub fn record_activity(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn since_last_activity(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Whether no activity happened inside the trailing window
    pub fn is_idle(&self) -> bool {
        self.since_last_activity() > self.window
    }

    /// `base` while active, `base * idle_multiplier` while idle
    pub fn adaptive_interval(&self, base: Duration, idle_multiplier: f64) -> Duration {
        if self.is_idle() {
            base.mul_f64(idle_multiplier.max(1.0))
        } else {
            base
        }
    }

    pub fn record_task(&self, task: &str, duration: Duration, items: usize) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks
                .entry(task.to_string())
                .or_default()
                .record_success(duration.as_millis() as u64, items as u64);
        }
    }

    pub fn record_task_error(&self, task: &str, duration: Duration) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks
                .entry(task.to_string())
                .or_default()
                .record_error(duration.as_millis() as u64);
        }
    }

    pub fn task_stats(&self) -> BTreeMap<String, TaskStats> {
        self.tasks
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }
}
