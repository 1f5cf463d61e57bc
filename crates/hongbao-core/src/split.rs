//! Per-claim share computation.
//!
//! `Equal` hands out `remaining / slices` and lets the division remainder roll forward,
//! so the last slice always takes exactly what is left. `Random` uses the double-average
//! method: draw uniformly from `1..=max(1, 2 * remaining / slices)`, then clamp so every
//! later slice can still get at least one unit.
//!
//! The result always satisfies the pool kernel's `TakeSlice` guard.

use crate::pool::{PoolError, PoolState};
use crate::{Points, SplitMode};
use rand::Rng;

/// Compute how much the next claim receives from `pool`.
pub fn split_amount<R: Rng + ?Sized>(
    pool: &PoolState,
    mode: SplitMode,
    rng: &mut R,
) -> Result<Points, PoolError> {
    let remaining = pool.remaining_amount;
    let slices = pool.remaining_slices as Points;

    if slices == 0 {
        return Err(PoolError::Exhausted);
    }
    if remaining < slices {
        return Err(PoolError::InvariantViolation("MinimumShare"));
    }
    if slices == 1 {
        return Ok(remaining);
    }

    let amount = match mode {
        SplitMode::Equal => remaining / slices,
        SplitMode::Random => {
            let cap = ((2 * remaining as u128) / slices as u128).max(1) as Points;
            let drawn = rng.gen_range(1..=cap);
            let ceiling = remaining - (slices - 1);
            drawn.min(ceiling)
        }
    };

    Ok(amount)
}
