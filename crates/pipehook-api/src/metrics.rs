//! Process-wide hook counters.

use pipehook_core::EventKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every request.
#[derive(Debug, Default)]
pub struct HookMetrics {
    push_hooks: AtomicU64,
    pull_request_hooks: AtomicU64,
    other_hooks: AtomicU64,
    invalid_hooks: AtomicU64,
    runs_created: AtomicU64,
    failed_requests: AtomicU64,
}

/// A point-in-time copy of [`HookMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub push_hooks: u64,
    pub pull_request_hooks: u64,
    pub other_hooks: u64,
    pub invalid_hooks: u64,
    pub runs_created: u64,
    pub failed_requests: u64,
}

impl HookMetrics {
    pub fn count_hook(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Push => &self.push_hooks,
            EventKind::PullRequest => &self.pull_request_hooks,
            EventKind::Other => &self.other_hooks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_invalid_hook(&self) {
        self.invalid_hooks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_run_created(&self) {
        self.runs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_failed_request(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            push_hooks: self.push_hooks.load(Ordering::Relaxed),
            pull_request_hooks: self.pull_request_hooks.load(Ordering::Relaxed),
            other_hooks: self.other_hooks.load(Ordering::Relaxed),
            invalid_hooks: self.invalid_hooks.load(Ordering::Relaxed),
            runs_created: self.runs_created.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}
