//! Shared harness for service integration tests.

#![allow(dead_code)]

use hongbao_adapters::{LocalEnvelopeStore, LocalPointsLedger};
use hongbao_core::{
    Claim, Envelope, EnvelopeConfig, EnvelopeStore, EnvelopeToken, HongbaoError, ManualClock,
    Points, PointsLedger, PoolState, Result, SliceCommit, SliceRevoke, UserId,
};
use hongbao_services::{EnvelopeSummary, RedEnvelopeService};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const FUNDER: UserId = UserId(1);
pub const START_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub service: RedEnvelopeService,
    pub ledger: Arc<LocalPointsLedger>,
    pub store: Arc<LocalEnvelopeStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(config: EnvelopeConfig) -> Harness {
    let store = Arc::new(LocalEnvelopeStore::new());
    let ledger = Arc::new(LocalPointsLedger::new());
    harness_with(config, store.clone(), store, ledger.clone(), ledger)
}

/// Build a service over arbitrary store/ledger wrappers while keeping handles on the
/// underlying local backends for assertions.
pub fn harness_with(
    config: EnvelopeConfig,
    store_handle: Arc<LocalEnvelopeStore>,
    store: Arc<dyn EnvelopeStore>,
    ledger_handle: Arc<LocalPointsLedger>,
    ledger: Arc<dyn PointsLedger>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(START_MS));
    let service = RedEnvelopeService::with_clock(config, store, ledger, clock.clone());
    Harness {
        service,
        ledger: ledger_handle,
        store: store_handle,
        clock,
    }
}

pub fn seeded(seed: u64) -> EnvelopeConfig {
    EnvelopeConfig {
        rng_seed: Some(seed),
        ..EnvelopeConfig::default()
    }
}

/// Conservation: claimed shares plus the pool always equal the funded total.
pub fn assert_conserved(summary: &EnvelopeSummary) {
    let env = &summary.envelope;
    assert_eq!(
        summary.claimed_amount(),
        env.total_amount - env.remaining_amount,
        "claims do not add up for {}",
        env.token
    );
    assert_eq!(
        summary.claims.len() as u32,
        env.total_slices - env.remaining_slices
    );
    assert!(env.remaining_amount >= env.remaining_slices as Points);
    env.check_invariants().unwrap();
}

/// After finishing: exactly one luckiest claim, holding the maximum amount, earliest on ties.
pub fn assert_luckiest(summary: &EnvelopeSummary) {
    let flagged: Vec<&Claim> = summary.claims.iter().filter(|c| c.is_luckiest).collect();
    assert_eq!(flagged.len(), 1, "expected exactly one luckiest claim");
    let best = summary.claims.iter().map(|c| c.amount).max().unwrap();
    assert_eq!(flagged[0].amount, best);
    let earliest = summary
        .claims
        .iter()
        .filter(|c| c.amount == best)
        .min_by_key(|c| (c.claimed_at_ms, c.slice_index))
        .unwrap();
    assert_eq!(flagged[0].claimant, earliest.claimant);
}

// =============================================================================
// Fault-injecting wrappers
// =============================================================================

type Hook = Box<dyn FnOnce() + Send>;

/// Ledger whose credits fail with a transient error while `fail_credits` is set, or for
/// the next `fail_next` calls. `on_failure` runs once, inside the first failing credit.
pub struct FlakyLedger {
    pub inner: Arc<LocalPointsLedger>,
    pub fail_credits: AtomicBool,
    pub fail_next: AtomicU32,
    pub credit_attempts: AtomicU32,
    on_failure: Mutex<Option<Hook>>,
}

impl FlakyLedger {
    pub fn new(inner: Arc<LocalPointsLedger>) -> Self {
        Self {
            inner,
            fail_credits: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            credit_attempts: AtomicU32::new(0),
            on_failure: Mutex::new(None),
        }
    }

    pub fn on_failure(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_failure.lock().unwrap() = Some(Box::new(hook));
    }

    fn should_fail(&self) -> bool {
        self.fail_credits.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

impl PointsLedger for FlakyLedger {
    fn balance(&self, user: UserId) -> Result<Points> {
        self.inner.balance(user)
    }

    fn debit(&self, user: UserId, amount: Points) -> Result<()> {
        self.inner.debit(user, amount)
    }

    fn credit(&self, user: UserId, amount: Points) -> Result<()> {
        self.credit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            let hook = self.on_failure.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            return Err(HongbaoError::Storage("ledger unavailable".into()));
        }
        self.inner.credit(user, amount)
    }
}

/// Store that can refuse inserts or pool transitions, or report every slice commit as a
/// lost race.
pub struct FaultyStore {
    pub inner: Arc<LocalEnvelopeStore>,
    pub fail_inserts: AtomicBool,
    pub fail_transitions: AtomicBool,
    pub always_conflict: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<LocalEnvelopeStore>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_transitions: AtomicBool::new(false),
            always_conflict: AtomicBool::new(false),
        }
    }
}

impl EnvelopeStore for FaultyStore {
    fn insert_envelope(&self, envelope: &Envelope) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(HongbaoError::Storage("disk full".into()));
        }
        self.inner.insert_envelope(envelope)
    }

    fn envelope(&self, token: &EnvelopeToken) -> Result<Option<Envelope>> {
        self.inner.envelope(token)
    }

    fn has_claim(&self, token: &EnvelopeToken, claimant: UserId) -> Result<bool> {
        self.inner.has_claim(token, claimant)
    }

    fn commit_slice(
        &self,
        token: &EnvelopeToken,
        expected: &PoolState,
        next: &PoolState,
        claim: &Claim,
    ) -> Result<SliceCommit> {
        if self.always_conflict.load(Ordering::SeqCst) {
            return Ok(SliceCommit::PoolChanged);
        }
        self.inner.commit_slice(token, expected, next, claim)
    }

    fn revoke_slice(&self, token: &EnvelopeToken, claimant: UserId) -> Result<SliceRevoke> {
        self.inner.revoke_slice(token, claimant)
    }

    fn transition(
        &self,
        token: &EnvelopeToken,
        expected: &PoolState,
        next: &PoolState,
    ) -> Result<bool> {
        if self.fail_transitions.load(Ordering::SeqCst) {
            return Err(HongbaoError::Storage("replica lagging".into()));
        }
        self.inner.transition(token, expected, next)
    }

    fn claims(&self, token: &EnvelopeToken) -> Result<Vec<Claim>> {
        self.inner.claims(token)
    }

    fn mark_luckiest(&self, token: &EnvelopeToken, claimant: UserId) -> Result<bool> {
        self.inner.mark_luckiest(token, claimant)
    }

    fn expired_active(&self, now_ms: i64, limit: usize) -> Result<Vec<Envelope>> {
        self.inner.expired_active(now_ms, limit)
    }

    fn stalled_exhausted(&self, limit: usize) -> Result<Vec<Envelope>> {
        self.inner.stalled_exhausted(limit)
    }

    fn attach_message(&self, token: &EnvelopeToken, message_id: i64) -> Result<bool> {
        self.inner.attach_message(token, message_id)
    }
}
