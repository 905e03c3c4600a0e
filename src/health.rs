//! Process-wide counters reported by the health check collaborator

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct HealthStats {
    events_dispatched: AtomicU64,
    events_suppressed: AtomicU64,
    internal_calls_dropped: AtomicU64,
    exit_events_sent: AtomicU64,
}

/// Point-in-time copy of [`HealthStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub events_dispatched: u64,
    pub events_suppressed: u64,
    pub internal_calls_dropped: u64,
    pub exit_events_sent: u64,
}

impl HealthStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_events_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_suppressed(&self) {
        self.events_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_internal_calls_dropped(&self) {
        self.internal_calls_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_exit_events_sent(&self) {
        self.exit_events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exit_events_sent(&self) -> u64 {
        self.exit_events_sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_suppressed: self.events_suppressed.load(Ordering::Relaxed),
            internal_calls_dropped: self.internal_calls_dropped.load(Ordering::Relaxed),
            exit_events_sent: self.exit_events_sent.load(Ordering::Relaxed),
        }
    }
}
