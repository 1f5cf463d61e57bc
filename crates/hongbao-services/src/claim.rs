//! Claim coordination.
//!
//! A claim reads the envelope, checks eligibility, computes a share from the pool it
//! read, and commits with a compare-and-swap on that pool plus a unique claim insert.
//! Losing the race means another claim (or the expiry sweep) moved the pool first; the
//! claimant re-reads and tries again, up to the configured budget. Each lost race maps
//! to a slice someone else took, so a budget above the slice count never gives up
//! while slices remain.

use hongbao_core::pool::{self, PoolCommand, PoolError};
use hongbao_core::{
    split_amount, Claim, Envelope, EnvelopeStatus, EnvelopeToken, HongbaoError, Result,
    SliceCommit, SliceRevoke, UserId,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::lifecycle::EnvelopeLifecycle;
use crate::types::ClaimOutcome;

pub struct ClaimCoordinator {
    lifecycle: EnvelopeLifecycle,
    rng: Mutex<StdRng>,
}

impl ClaimCoordinator {
    pub fn new(lifecycle: EnvelopeLifecycle) -> Self {
        let rng = match lifecycle.context().config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            lifecycle,
            rng: Mutex::new(rng),
        }
    }

    /// Eligibility checks, in the order callers observe them.
    fn check_eligible(&self, envelope: &Envelope, claimant: UserId) -> Result<()> {
        let ctx = self.lifecycle.context();
        match envelope.status {
            EnvelopeStatus::Expired => return Err(HongbaoError::EnvelopeExpired),
            EnvelopeStatus::Finished => return Err(HongbaoError::EnvelopeFinished),
            EnvelopeStatus::Active => {}
        }

        if envelope.is_past_expiry(ctx.now_ms()) {
            if envelope.remaining_slices == 0 {
                return Err(HongbaoError::EnvelopeFinished);
            }
            // Opportunistic expiry; the sweep would get here eventually.
            if let Err(e) = self.lifecycle.expire(&envelope.token) {
                warn!(token = %envelope.token, error = %e, "opportunistic expiry failed");
            }
            return Err(HongbaoError::EnvelopeExpired);
        }

        if envelope.remaining_slices == 0 {
            return Err(HongbaoError::EnvelopeFinished);
        }
        if claimant == envelope.funder {
            return Err(HongbaoError::CannotClaimOwn);
        }
        if let Some(target) = envelope.target() {
            if target != claimant {
                return Err(HongbaoError::NotTargetUser);
            }
        }

        let token = &envelope.token;
        if ctx.retry("claim lookup", || ctx.store.has_claim(token, claimant))? {
            return Err(HongbaoError::AlreadyClaimed);
        }
        Ok(())
    }

    fn draw(&self, envelope: &Envelope) -> Result<u64> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| HongbaoError::OperationFailed("split rng lock poisoned".into()))?;
        split_amount(&envelope.pool(), envelope.mode, &mut *rng).map_err(|e| pool_fault(envelope, e))
    }

    /// Claim one slice of `token` for `claimant`.
    #[instrument(skip(self, claimant_name), fields(token = %token, claimant = %claimant))]
    pub fn claim(
        &self,
        token: &EnvelopeToken,
        claimant: UserId,
        claimant_name: &str,
    ) -> Result<ClaimOutcome> {
        let ctx = self.lifecycle.context();
        if !token.is_well_formed() {
            ctx.metrics.claims_rejected.inc();
            debug!("malformed token");
            return Err(HongbaoError::EnvelopeNotFound);
        }
        let budget = ctx.config.retry_budget.max(1);

        for attempt in 1..=budget {
            let envelope = ctx
                .retry("load envelope", || ctx.store.envelope(token))?
                .ok_or(HongbaoError::EnvelopeNotFound)?;

            if let Err(e) = self.check_eligible(&envelope, claimant) {
                if e.is_domain() {
                    ctx.metrics.claims_rejected.inc();
                    debug!(reason = %e, "claim rejected");
                }
                return Err(e);
            }

            let expected = envelope.pool();
            let amount = self.draw(&envelope)?;
            let (next, _) = pool::step(&expected, PoolCommand::TakeSlice { amount })
                .map_err(|e| pool_fault(&envelope, e))?;

            let mut claim = Claim {
                token: envelope.token.clone(),
                claimant,
                claimant_name: claimant_name.to_string(),
                amount,
                // Assigned by the store on commit.
                slice_index: 0,
                is_luckiest: false,
                claimed_at_ms: ctx.now_ms(),
            };

            let commit = ctx.retry("commit slice", || {
                ctx.store.commit_slice(token, &expected, &next, &claim)
            })?;
            match commit {
                SliceCommit::Committed { slice_index } => {
                    claim.slice_index = slice_index;
                    return self.settle(envelope, claim, next.remaining_slices);
                }
                SliceCommit::PoolChanged => {
                    ctx.metrics.pool_conflicts.inc();
                    debug!(attempt, "pool changed under claim, retrying");
                }
                SliceCommit::DuplicateClaimant => {
                    ctx.metrics.claims_rejected.inc();
                    return Err(HongbaoError::AlreadyClaimed);
                }
            }
        }

        warn!(budget, "claim gave up after repeated pool conflicts");
        Err(HongbaoError::OperationFailed(
            "envelope is too busy, try again".into(),
        ))
    }

    /// Credit the committed slice, then finish the envelope if this was the last one.
    fn settle(
        &self,
        envelope: Envelope,
        claim: Claim,
        remaining_slices: u32,
    ) -> Result<ClaimOutcome> {
        let ctx = self.lifecycle.context();
        let token = &envelope.token;

        if let Err(e) = ctx.retry("credit claimant", || ctx.ledger.credit(claim.claimant, claim.amount)) {
            ctx.metrics.compensations.inc();
            warn!(error = %e, amount = claim.amount, "claimant credit failed, revoking slice");
            match ctx.retry("revoke slice", || ctx.store.revoke_slice(token, claim.claimant)) {
                Ok(SliceRevoke::Revoked(_)) => {
                    return Err(HongbaoError::OperationFailed(format!(
                        "could not credit claim: {e}"
                    )));
                }
                Ok(SliceRevoke::Closed(status)) => {
                    // The envelope closed between commit and credit. Its refund or finish
                    // already excluded this slice, so the claim stands and must be paid.
                    warn!(%status, "envelope closed before credit, retrying credit");
                    if let Err(again) = ctx.retry("credit claimant", || {
                        ctx.ledger.credit(claim.claimant, claim.amount)
                    }) {
                        error!(
                            amount = claim.amount,
                            error = %again,
                            "claim stands on closed envelope; credit outstanding"
                        );
                        return Err(HongbaoError::OperationFailed(format!(
                            "could not credit claim: {again}"
                        )));
                    }
                }
                Ok(SliceRevoke::NotFound) => {
                    error!(amount = claim.amount, "committed claim vanished before revocation");
                    return Err(HongbaoError::OperationFailed(format!(
                        "could not credit claim: {e}"
                    )));
                }
                Err(revoke) => {
                    error!(
                        amount = claim.amount,
                        error = %revoke,
                        "slice revocation failed; claim row holds uncredited points"
                    );
                    return Err(HongbaoError::OperationFailed(format!(
                        "could not credit claim: {e}"
                    )));
                }
            }
        }

        ctx.metrics.claims_committed.inc();
        ctx.metrics.points_distributed.inc_by(claim.amount);
        info!(amount = claim.amount, slice = claim.slice_index, remaining_slices, "claim committed");

        let is_finished = remaining_slices == 0;
        let mut is_luckiest = false;
        if is_finished {
            // The claim itself is durable; a failure here is repaired by the sweep.
            match self.lifecycle.finish_exhausted(token) {
                Ok(outcome) => is_luckiest = outcome.luckiest == Some(claim.claimant),
                Err(e) => error!(error = %e, "failed to finish exhausted envelope"),
            }
        }

        Ok(ClaimOutcome {
            amount: claim.amount,
            slice_index: claim.slice_index,
            remaining_slices,
            is_finished,
            is_luckiest,
            total_amount: envelope.total_amount,
            total_slices: envelope.total_slices,
            funder_name: envelope.funder_name,
            message: envelope.message,
        })
    }
}

fn pool_fault(envelope: &Envelope, e: PoolError) -> HongbaoError {
    HongbaoError::OperationFailed(format!("envelope {}: {e}", envelope.token))
}
