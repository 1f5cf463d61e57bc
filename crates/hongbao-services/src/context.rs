//! Collaborators shared by the lifecycle and the claim coordinator.

use hongbao_core::{
    Clock, EngineMetrics, EnvelopeConfig, EnvelopeStore, HongbaoError, PointsLedger, Result,
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn EnvelopeStore>,
    pub ledger: Arc<dyn PointsLedger>,
    pub clock: Arc<dyn Clock>,
    pub config: EnvelopeConfig,
    pub metrics: Arc<EngineMetrics>,
}

impl EngineContext {
    pub fn new(
        config: EnvelopeConfig,
        store: Arc<dyn EnvelopeStore>,
        ledger: Arc<dyn PointsLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            config,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Run `op`, retrying transient failures up to the configured budget.
    ///
    /// Domain errors pass through untouched. A transient failure that survives every
    /// attempt is surfaced as `OperationFailed`.
    pub fn retry<T>(&self, what: &'static str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let budget = self.config.retry_budget.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < budget => {
                    debug!(op = what, attempt, error = %e, "transient failure, retrying");
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(op = what, attempts = attempt, error = %e, "retry budget exhausted");
                    return Err(HongbaoError::OperationFailed(format!("{what}: {e}")));
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hongbao_adapters::{LocalEnvelopeStore, LocalPointsLedger};
    use hongbao_core::ManualClock;
    use std::cell::Cell;

    fn context(budget: u32) -> EngineContext {
        let config = EnvelopeConfig {
            retry_budget: budget,
            ..EnvelopeConfig::default()
        };
        EngineContext::new(
            config,
            Arc::new(LocalEnvelopeStore::new()),
            Arc::new(LocalPointsLedger::new()),
            Arc::new(ManualClock::new(0)),
        )
    }

    #[test]
    fn transient_failures_are_retried_then_surface_as_operation_failed() {
        let ctx = context(3);
        let calls = Cell::new(0);
        let out: Result<()> = ctx.retry("flaky", || {
            calls.set(calls.get() + 1);
            Err(HongbaoError::Storage("connection reset".into()))
        });
        assert_eq!(calls.get(), 3);
        assert!(matches!(out, Err(HongbaoError::OperationFailed(_))));
    }

    #[test]
    fn recovers_within_budget() {
        let ctx = context(3);
        let calls = Cell::new(0);
        let out = ctx.retry("flaky", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(HongbaoError::Storage("busy".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out, Ok(7));
    }

    #[test]
    fn domain_errors_are_not_retried() {
        let ctx = context(5);
        let calls = Cell::new(0);
        let out: Result<()> = ctx.retry("claim", || {
            calls.set(calls.get() + 1);
            Err(HongbaoError::AlreadyClaimed)
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(out, Err(HongbaoError::AlreadyClaimed));
    }
}
