//! Transition kernel for an envelope's shared pool.
//!
//! The `(remaining_amount, remaining_slices, status)` triple is the only state that
//! concurrent claims contend on. Every change to it goes through [`step`], which checks
//! invariants before and after the transition and fails closed on any violation. Storage
//! backends persist the returned state with a compare-and-swap against the state the
//! caller started from.

use crate::{EnvelopeStatus, Points};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolState {
    pub remaining_amount: Points,
    pub remaining_slices: u32,
    pub status: EnvelopeStatus,
}

impl PoolState {
    pub fn funded(amount: Points, slices: u32) -> Self {
        Self {
            remaining_amount: amount,
            remaining_slices: slices,
            status: EnvelopeStatus::Active,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_slices == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolCommand {
    /// Consume one slice worth `amount`.
    TakeSlice { amount: Points },
    /// Close an exhausted pool.
    Finish,
    /// Close an active pool that still has slices; the remainder becomes refundable.
    Expire,
}

/// Effects produced by a transition (data, not side effects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolEffects {
    pub taken: Points,
    pub refundable: Points,
    /// The transition consumed the last slice.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
    #[error("precondition failed: {0}")]
    PreconditionFailed(&'static str),
    #[error("pool is {0}")]
    Closed(EnvelopeStatus),
    #[error("no slices remain")]
    Exhausted,
}

/// Check all pool invariants.
pub fn check_invariants(state: &PoolState) -> Result<(), PoolError> {
    // MinimumShare: every remaining slice can still receive at least one unit.
    if state.remaining_amount < state.remaining_slices as Points {
        return Err(PoolError::InvariantViolation("MinimumShare"));
    }

    // FinishedIsEmpty
    if state.status == EnvelopeStatus::Finished
        && (state.remaining_amount != 0 || state.remaining_slices != 0)
    {
        return Err(PoolError::InvariantViolation("FinishedIsEmpty"));
    }

    Ok(())
}

/// Execute a transition: (state, command) -> (next state, effects).
pub fn step(state: &PoolState, cmd: PoolCommand) -> Result<(PoolState, PoolEffects), PoolError> {
    check_invariants(state)?;

    let (post, effects) = match cmd {
        PoolCommand::TakeSlice { amount } => {
            if state.status != EnvelopeStatus::Active {
                return Err(PoolError::Closed(state.status));
            }
            if state.remaining_slices == 0 {
                return Err(PoolError::Exhausted);
            }
            if amount == 0 {
                return Err(PoolError::PreconditionFailed("slice amount must be positive"));
            }
            let remaining_amount = state
                .remaining_amount
                .checked_sub(amount)
                .ok_or(PoolError::PreconditionFailed("slice exceeds pool"))?;
            let remaining_slices = state.remaining_slices - 1;
            if remaining_amount < remaining_slices as Points {
                return Err(PoolError::PreconditionFailed(
                    "slice leaves less than one unit per remaining slice",
                ));
            }
            if remaining_slices == 0 && remaining_amount != 0 {
                return Err(PoolError::PreconditionFailed(
                    "last slice must take the exact remainder",
                ));
            }

            let post = PoolState {
                remaining_amount,
                remaining_slices,
                status: EnvelopeStatus::Active,
            };
            let effects = PoolEffects {
                taken: amount,
                refundable: 0,
                exhausted: remaining_slices == 0,
            };
            (post, effects)
        }
        PoolCommand::Finish => {
            if state.status != EnvelopeStatus::Active {
                return Err(PoolError::Closed(state.status));
            }
            if state.remaining_slices != 0 || state.remaining_amount != 0 {
                return Err(PoolError::PreconditionFailed("finish requires an empty pool"));
            }
            let post = PoolState {
                status: EnvelopeStatus::Finished,
                ..*state
            };
            (post, PoolEffects::default())
        }
        PoolCommand::Expire => {
            if state.status != EnvelopeStatus::Active {
                return Err(PoolError::Closed(state.status));
            }
            // An exhausted pool belongs to the claim that emptied it; that claim finishes it.
            if state.remaining_slices == 0 {
                return Err(PoolError::Exhausted);
            }
            let post = PoolState {
                status: EnvelopeStatus::Expired,
                ..*state
            };
            let effects = PoolEffects {
                taken: 0,
                refundable: state.remaining_amount,
                exhausted: false,
            };
            (post, effects)
        }
    };

    check_invariants(&post)?;
    Ok((post, effects))
}
