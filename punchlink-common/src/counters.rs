//! Pipeline counters
//!
//! Policy drops (backlog, timestamp fallback, unrecognised payloads) are not
//! errors, but they must stay observable.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::AttendanceEvent;

#[derive(Debug, Default)]
pub struct PipelineCounters {
    backlog_filtered: AtomicU64,
    timestamp_fallbacks: AtomicU64,
    unrecognized_payloads: AtomicU64,
    forwards_succeeded: AtomicU64,
    forwards_failed: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub backlog_filtered: u64,
    pub timestamp_fallbacks: u64,
    pub unrecognized_payloads: u64,
    pub forwards_succeeded: u64,
    pub forwards_failed: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_backlog_filtered(&self) {
        self.backlog_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrecognized(&self) {
        self.unrecognized_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward(&self, success: bool) {
        if success {
            self.forwards_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.forwards_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count the event if its timestamp was substituted
    pub fn observe(&self, event: &AttendanceEvent) {
        if event.timestamp_inferred {
            self.timestamp_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            backlog_filtered: self.backlog_filtered.load(Ordering::Relaxed),
            timestamp_fallbacks: self.timestamp_fallbacks.load(Ordering::Relaxed),
            unrecognized_payloads: self.unrecognized_payloads.load(Ordering::Relaxed),
            forwards_succeeded: self.forwards_succeeded.load(Ordering::Relaxed),
            forwards_failed: self.forwards_failed.load(Ordering::Relaxed),
        }
    }
}
