//! Adaptive background scheduler
//!
//! Two janitors run under one [`JanitorSupervisor`]:
//! - [`HistoryJanitor`]: ages out query history and expired cache entries,
//!   polling less often while the system is idle
//! - [`JobJanitor`]: fires due scheduled jobs, polling faster as the next
//!   due time approaches

pub mod activity;
pub mod history;
pub mod jobs;
pub mod supervisor;

pub use activity::{ActivityTracker, TaskStats};
pub use history::{HistoryEntry, HistoryJanitor, HistoryStore, InMemoryHistoryStore};
pub use jobs::{
    poll_interval, Cadence, InMemoryJobStore, JobIntervals, JobJanitor, JobRunner, JobStore,
    ScheduledJob,
};
pub use supervisor::{Janitor, JanitorSupervisor, LoopState, SchedulerStats};
