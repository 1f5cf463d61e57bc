//! Envelope storage boundary.
//!
//! Logical layout: one envelope table keyed by token and one append-only claims table
//! keyed by `(token, claimant)` with a uniqueness constraint. All concurrency control
//! lives behind this trait as conditional (compare-and-swap) writes, so correctness does
//! not depend on in-process locks held by the caller.

use crate::{Claim, Envelope, EnvelopeStatus, EnvelopeToken, PoolState, Result, UserId};

/// Outcome of [`EnvelopeStore::commit_slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceCommit {
    /// Pool updated and claim row inserted under the store-assigned `slice_index`.
    Committed { slice_index: u32 },
    /// The stored pool no longer matches the expected state; nothing was written.
    PoolChanged,
    /// The claimant already holds a claim on this envelope; nothing was written.
    DuplicateClaimant,
}

/// Outcome of [`EnvelopeStore::revoke_slice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceRevoke {
    /// Claim row deleted and its amount and slice returned to the pool.
    Revoked(Claim),
    /// The envelope already left `Active`; its refund or finish accounted for the claim,
    /// so nothing was written and the claim stands.
    Closed(EnvelopeStatus),
    /// No envelope or no claim for this claimant.
    NotFound,
}

pub trait EnvelopeStore: Send + Sync {
    /// Insert a new envelope. Fails with `Storage` if the token already exists.
    fn insert_envelope(&self, envelope: &Envelope) -> Result<()>;

    fn envelope(&self, token: &EnvelopeToken) -> Result<Option<Envelope>>;

    fn has_claim(&self, token: &EnvelopeToken, claimant: UserId) -> Result<bool>;

    /// Atomically: if the stored pool equals `expected` and `claim.claimant` has no claim,
    /// replace the pool with `next` and insert `claim`.
    ///
    /// The store assigns `slice_index` from the envelope's issue counter, ignoring the
    /// value carried by `claim`. Indexes are never reused.
    ///
    /// Returns `EnvelopeNotFound` if the envelope does not exist.
    fn commit_slice(
        &self,
        token: &EnvelopeToken,
        expected: &PoolState,
        next: &PoolState,
        claim: &Claim,
    ) -> Result<SliceCommit>;

    /// Compensation for a committed slice whose ledger credit could not be applied:
    /// delete the claim row and return its amount and slice to the pool.
    ///
    /// Only an `Active` envelope is touched. A terminal envelope is never reopened.
    fn revoke_slice(&self, token: &EnvelopeToken, claimant: UserId) -> Result<SliceRevoke>;

    /// Conditional pool transition (finish / expire). Returns `false` if the stored pool
    /// no longer equals `expected`.
    fn transition(&self, token: &EnvelopeToken, expected: &PoolState, next: &PoolState)
        -> Result<bool>;

    /// All claims on an envelope, ordered by `claimed_at_ms` then `slice_index`.
    fn claims(&self, token: &EnvelopeToken) -> Result<Vec<Claim>>;

    /// Flag `claimant`'s claim as luckiest unless some claim already is.
    /// Returns `true` if this call set the flag.
    fn mark_luckiest(&self, token: &EnvelopeToken, claimant: UserId) -> Result<bool>;

    /// Active envelopes with `expires_at_ms <= now_ms`, oldest first, at most `limit`.
    fn expired_active(&self, now_ms: i64, limit: usize) -> Result<Vec<Envelope>>;

    /// Active envelopes with no slices left, whatever their deadline, at most `limit`.
    fn stalled_exhausted(&self, limit: usize) -> Result<Vec<Envelope>>;

    /// Record the chat message hosting the envelope. Returns `false` if unknown.
    fn attach_message(&self, token: &EnvelopeToken, message_id: i64) -> Result<bool>;
}
