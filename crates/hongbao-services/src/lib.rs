//! Red-envelope engine services.
//!
//! [`RedEnvelopeService`] is the entry point surfaces call: it wires the envelope
//! lifecycle (create, expire, finish) and the claim coordinator over a shared
//! [`EngineContext`] of storage, ledger, clock, configuration and metrics.

pub mod claim;
pub mod context;
pub mod lifecycle;
pub mod types;

pub use claim::ClaimCoordinator;
pub use context::EngineContext;
pub use lifecycle::{EnvelopeLifecycle, FinishOutcome};
pub use types::{
    ClaimOutcome, CreateEnvelopeRequest, CreatedEnvelope, EnvelopeSummary, ExpiredEnvelope,
    SweepReport,
};

use hongbao_core::{
    Clock, EngineMetrics, EnvelopeConfig, EnvelopeStore, EnvelopeToken, HongbaoError,
    MetricsSnapshot, PointsLedger, Result, SystemClock, UserId,
};
use std::sync::Arc;
use tracing::instrument;

pub struct RedEnvelopeService {
    lifecycle: EnvelopeLifecycle,
    claims: ClaimCoordinator,
}

impl RedEnvelopeService {
    pub fn new(
        config: EnvelopeConfig,
        store: Arc<dyn EnvelopeStore>,
        ledger: Arc<dyn PointsLedger>,
    ) -> Self {
        Self::with_clock(config, store, ledger, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EnvelopeConfig,
        store: Arc<dyn EnvelopeStore>,
        ledger: Arc<dyn PointsLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lifecycle = EnvelopeLifecycle::new(EngineContext::new(config, store, ledger, clock));
        let claims = ClaimCoordinator::new(lifecycle.clone());
        Self { lifecycle, claims }
    }

    pub fn create_envelope(&self, request: CreateEnvelopeRequest) -> Result<CreatedEnvelope> {
        self.lifecycle.create(request)
    }

    pub fn claim_envelope(
        &self,
        token: &EnvelopeToken,
        claimant: UserId,
        claimant_name: &str,
    ) -> Result<ClaimOutcome> {
        self.claims.claim(token, claimant, claimant_name)
    }

    /// Current envelope state and its claims, without side effects.
    #[instrument(skip(self), fields(token = %token))]
    pub fn envelope_summary(&self, token: &EnvelopeToken) -> Result<EnvelopeSummary> {
        if !token.is_well_formed() {
            return Err(HongbaoError::EnvelopeNotFound);
        }
        let ctx = self.lifecycle.context();
        let envelope = ctx
            .retry("load envelope", || ctx.store.envelope(token))?
            .ok_or(HongbaoError::EnvelopeNotFound)?;
        let claims = ctx.retry("load claims", || ctx.store.claims(token))?;
        Ok(EnvelopeSummary { envelope, claims })
    }

    pub fn sweep_expired(&self) -> Result<SweepReport> {
        self.lifecycle.sweep_expired()
    }

    pub fn attach_message(&self, token: &EnvelopeToken, message_id: i64) -> Result<()> {
        self.lifecycle.attach_message(token, message_id)
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.lifecycle.context().config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.lifecycle.context().metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics().snapshot()
    }
}
