//! Envelope creation, expiry and finishing.
//!
//! Creation escrows the funder's points with a conditional ledger debit before the
//! envelope row exists; a failed insert is compensated by crediting the points back.
//! Expiry and finishing are conditional pool transitions, so whichever caller wins the
//! transition is the only one that performs its side effects (refund, luckiest flag).

use hongbao_core::pool::{self, PoolCommand};
use hongbao_core::{
    luckiest_claim, Envelope, EnvelopeStatus, EnvelopeToken, Feature, HongbaoError, Points,
    Result, UserId, Visibility,
};
use tracing::{debug, error, info, instrument, warn};

use crate::context::EngineContext;
use crate::types::{CreateEnvelopeRequest, CreatedEnvelope, ExpiredEnvelope, SweepReport};

/// Outcome of [`EnvelopeLifecycle::finish_exhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishOutcome {
    /// This call performed the `Active -> Finished` transition.
    pub transitioned: bool,
    pub luckiest: Option<UserId>,
}

#[derive(Clone)]
pub struct EnvelopeLifecycle {
    ctx: EngineContext,
}

impl EnvelopeLifecycle {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn validate(&self, req: &CreateEnvelopeRequest) -> Result<()> {
        let config = &self.ctx.config;

        if !config.enabled {
            return Err(HongbaoError::FeatureDisabled(Feature::RedEnvelopes));
        }
        if req.visibility.is_targeted() && !config.allow_targeted {
            return Err(HongbaoError::FeatureDisabled(Feature::TargetedEnvelopes));
        }

        if req.total_amount == 0 {
            return Err(HongbaoError::InvalidAmount("amount must be positive"));
        }
        if req.total_slices == 0 || req.total_slices > config.max_slices {
            return Err(HongbaoError::InvalidSliceCount {
                max: config.max_slices,
            });
        }
        if req.total_amount < req.total_slices as Points {
            return Err(HongbaoError::InvalidAmount(
                "amount must cover at least one point per slice",
            ));
        }
        if let Visibility::Targeted { target, .. } = &req.visibility {
            if *target == req.funder {
                return Err(HongbaoError::InvalidRequest(
                    "a targeted envelope cannot target its funder".into(),
                ));
            }
        }
        Ok(())
    }

    /// Validate, escrow the funder's points, and persist a new active envelope.
    #[instrument(skip(self, req), fields(funder = %req.funder, amount = req.total_amount, slices = req.total_slices))]
    pub fn create(&self, req: CreateEnvelopeRequest) -> Result<CreatedEnvelope> {
        self.validate(&req)?;

        let ctx = &self.ctx;
        ctx.retry("escrow debit", || ctx.ledger.debit(req.funder, req.total_amount))?;

        let now = ctx.now_ms();
        let message = match req.message.trim() {
            "" => ctx.config.default_message.clone(),
            m => m.to_string(),
        };
        let envelope = Envelope {
            token: EnvelopeToken::generate(req.funder, now),
            funder: req.funder,
            funder_name: req.funder_name,
            total_amount: req.total_amount,
            total_slices: req.total_slices,
            remaining_amount: req.total_amount,
            remaining_slices: req.total_slices,
            slices_issued: 0,
            mode: req.mode,
            visibility: req.visibility,
            message,
            chat_id: req.chat_id,
            message_id: None,
            status: EnvelopeStatus::Active,
            created_at_ms: now,
            expires_at_ms: now.saturating_add(ctx.config.ttl_ms),
        };

        if let Err(e) = ctx.retry("insert envelope", || ctx.store.insert_envelope(&envelope)) {
            warn!(error = %e, "envelope insert failed, returning escrow to funder");
            ctx.metrics.compensations.inc();
            if let Err(refund) =
                ctx.retry("escrow rollback", || ctx.ledger.credit(envelope.funder, envelope.total_amount))
            {
                error!(
                    funder = %envelope.funder,
                    amount = envelope.total_amount,
                    error = %refund,
                    "escrow rollback failed; points are stranded"
                );
            }
            return Err(match e {
                HongbaoError::OperationFailed(_) => e,
                other => HongbaoError::OperationFailed(format!("envelope insert failed: {other}")),
            });
        }

        ctx.metrics.envelopes_created.inc();
        ctx.metrics.points_escrowed.inc_by(envelope.total_amount);
        info!(
            token = %envelope.token,
            mode = envelope.mode.as_str(),
            targeted = envelope.visibility.is_targeted(),
            "envelope created"
        );

        Ok(CreatedEnvelope {
            token: envelope.token,
            total_amount: envelope.total_amount,
            total_slices: envelope.total_slices,
            message: envelope.message,
            expires_at_ms: envelope.expires_at_ms,
        })
    }

    /// Move an active, past-expiry envelope to `Expired` and refund the remainder.
    ///
    /// Returns `None` when there is nothing to do: unknown token, already terminal, not
    /// yet expired, or exhausted (the finishing claim owns it). Safe to call repeatedly
    /// and concurrently; only the caller that wins the transition refunds.
    #[instrument(skip(self), fields(token = %token))]
    pub fn expire(&self, token: &EnvelopeToken) -> Result<Option<ExpiredEnvelope>> {
        let ctx = &self.ctx;
        for attempt in 1..=ctx.config.retry_budget.max(1) {
            let Some(envelope) = ctx.retry("load envelope", || ctx.store.envelope(token))? else {
                return Ok(None);
            };
            if envelope.status != EnvelopeStatus::Active
                || envelope.remaining_slices == 0
                || !envelope.is_past_expiry(ctx.now_ms())
            {
                return Ok(None);
            }

            let expected = envelope.pool();
            let (next, effects) = pool::step(&expected, PoolCommand::Expire)
                .map_err(|e| HongbaoError::OperationFailed(format!("expire {token}: {e}")))?;

            if !ctx.retry("expire transition", || ctx.store.transition(token, &expected, &next))? {
                debug!(attempt, "pool moved under expiry, re-reading");
                continue;
            }

            ctx.metrics.envelopes_expired.inc();
            let refunded = self.refund(&envelope, effects.refundable)?;
            info!(funder = %envelope.funder, refunded, "envelope expired");
            return Ok(Some(ExpiredEnvelope {
                token: envelope.token,
                funder: envelope.funder,
                refunded,
            }));
        }

        Err(HongbaoError::OperationFailed(format!(
            "expiry of {token} kept conflicting with concurrent claims"
        )))
    }

    fn refund(&self, envelope: &Envelope, refundable: Points) -> Result<Points> {
        let ctx = &self.ctx;
        if !ctx.config.refund_on_expiry || refundable == 0 {
            return Ok(0);
        }
        match ctx.retry("expiry refund", || ctx.ledger.credit(envelope.funder, refundable)) {
            Ok(()) => {
                ctx.metrics.points_refunded.inc_by(refundable);
                Ok(refundable)
            }
            Err(e) => {
                // The transition already happened, so no later call will retry this refund.
                error!(
                    token = %envelope.token,
                    funder = %envelope.funder,
                    refundable,
                    error = %e,
                    "expiry refund failed"
                );
                Err(e)
            }
        }
    }

    /// Close an exhausted envelope and flag its luckiest claim.
    ///
    /// Idempotent: an already finished envelope just reports its luckiest claimant.
    pub fn finish_exhausted(&self, token: &EnvelopeToken) -> Result<FinishOutcome> {
        let ctx = &self.ctx;
        let mut transitioned = false;

        let mut settled = false;
        for _ in 0..ctx.config.retry_budget.max(1) {
            let envelope = ctx
                .retry("load envelope", || ctx.store.envelope(token))?
                .ok_or(HongbaoError::EnvelopeNotFound)?;
            match envelope.status {
                EnvelopeStatus::Finished => {
                    settled = true;
                    break;
                }
                EnvelopeStatus::Expired => {
                    return Err(HongbaoError::OperationFailed(format!(
                        "cannot finish expired envelope {token}"
                    )))
                }
                EnvelopeStatus::Active => {}
            }

            let expected = envelope.pool();
            let (next, _) = pool::step(&expected, PoolCommand::Finish)
                .map_err(|e| HongbaoError::OperationFailed(format!("finish {token}: {e}")))?;
            if ctx.retry("finish transition", || ctx.store.transition(token, &expected, &next))? {
                ctx.metrics.envelopes_finished.inc();
                transitioned = true;
                settled = true;
                break;
            }
        }
        if !settled {
            return Err(HongbaoError::OperationFailed(format!(
                "finish of {token} kept conflicting"
            )));
        }

        let claims = ctx.retry("load claims", || ctx.store.claims(token))?;
        let luckiest = match claims.iter().find(|c| c.is_luckiest) {
            Some(flagged) => Some(flagged.claimant),
            None => match luckiest_claim(&claims) {
                Some(best) => {
                    let claimant = best.claimant;
                    ctx.retry("mark luckiest", || ctx.store.mark_luckiest(token, claimant))?;
                    // A concurrent finisher may have flagged first; report whatever won.
                    let flagged = ctx
                        .retry("load claims", || ctx.store.claims(token))?
                        .into_iter()
                        .find(|c| c.is_luckiest)
                        .map(|c| c.claimant);
                    flagged.or(Some(claimant))
                }
                None => None,
            },
        };

        if transitioned {
            info!(token = %token, luckiest = ?luckiest, "envelope finished");
        }
        Ok(FinishOutcome {
            transitioned,
            luckiest,
        })
    }

    /// Expire every active envelope past its deadline, up to the configured batch limit.
    ///
    /// Exhausted envelopes that never reached `Finished` (a finishing claim that failed
    /// after committing) are finished first, whether or not their deadline has passed.
    /// Per-envelope failures are logged and counted; the sweep carries on with the rest.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self) -> Result<SweepReport> {
        let ctx = &self.ctx;
        let now = ctx.now_ms();
        let limit = ctx.config.sweep_batch_limit;
        let stalled = ctx.retry("scan exhausted", || ctx.store.stalled_exhausted(limit))?;
        let due: Vec<Envelope> = ctx
            .retry("scan expired", || ctx.store.expired_active(now, limit))?
            .into_iter()
            .filter(|e| e.remaining_slices > 0)
            .collect();

        let mut report = SweepReport {
            examined: stalled.len() + due.len(),
            ..SweepReport::default()
        };

        for envelope in stalled {
            match self.finish_exhausted(&envelope.token) {
                Ok(outcome) if outcome.transitioned => report.repaired += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(token = %envelope.token, error = %e, "failed to finish exhausted envelope");
                    report.failures += 1;
                }
            }
        }

        for envelope in due {
            match self.expire(&envelope.token) {
                Ok(Some(expired)) => report.expired.push(expired),
                Ok(None) => {}
                Err(e) => {
                    warn!(token = %envelope.token, error = %e, "failed to expire envelope");
                    report.failures += 1;
                }
            }
        }

        if !report.expired.is_empty() || report.repaired > 0 || report.failures > 0 {
            info!(
                examined = report.examined,
                expired = report.expired.len(),
                repaired = report.repaired,
                refunded = report.refunded_points(),
                failures = report.failures,
                "expiry sweep complete"
            );
        }
        Ok(report)
    }

    pub fn attach_message(&self, token: &EnvelopeToken, message_id: i64) -> Result<()> {
        let ctx = &self.ctx;
        if ctx.retry("attach message", || ctx.store.attach_message(token, message_id))? {
            Ok(())
        } else {
            Err(HongbaoError::EnvelopeNotFound)
        }
    }
}
