//! Engine counters.
//!
//! ```rust,ignore
//! use hongbao_core::metrics::EngineMetrics;
//!
//! let metrics = EngineMetrics::new();
//! metrics.claims_committed.inc();
//! println!("{}", serde_json::to_string(&metrics.snapshot())?);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A simple counter that can only increase.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for the envelope engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub envelopes_created: Counter,
    pub points_escrowed: Counter,
    pub claims_committed: Counter,
    pub claims_rejected: Counter,
    pub points_distributed: Counter,
    pub pool_conflicts: Counter,
    pub envelopes_finished: Counter,
    pub envelopes_expired: Counter,
    pub points_refunded: Counter,
    pub compensations: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            envelopes_created: self.envelopes_created.get(),
            points_escrowed: self.points_escrowed.get(),
            claims_committed: self.claims_committed.get(),
            claims_rejected: self.claims_rejected.get(),
            points_distributed: self.points_distributed.get(),
            pool_conflicts: self.pool_conflicts.get(),
            envelopes_finished: self.envelopes_finished.get(),
            envelopes_expired: self.envelopes_expired.get(),
            points_refunded: self.points_refunded.get(),
            compensations: self.compensations.get(),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub envelopes_created: u64,
    pub points_escrowed: u64,
    pub claims_committed: u64,
    pub claims_rejected: u64,
    pub points_distributed: u64,
    pub pool_conflicts: u64,
    pub envelopes_finished: u64,
    pub envelopes_expired: u64,
    pub points_refunded: u64,
    pub compensations: u64,
}
