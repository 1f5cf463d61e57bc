//! Points ledger boundary.
//!
//! The ledger owns user balances; the engine only issues debit/credit requests.

use crate::{Points, Result, UserId};

/// Integer point balances with atomic credit/debit.
///
/// Implementations must ensure:
/// - `debit` is a single conditional update (`balance >= amount`); it either applies in
///   full or fails with `HongbaoError::InsufficientBalance` and leaves the balance intact
/// - concurrent debits against one user can never drive the balance below zero
/// - transient backend failures surface as `HongbaoError::Storage`
pub trait PointsLedger: Send + Sync {
    /// Current balance. Unknown users have a balance of zero.
    fn balance(&self, user: UserId) -> Result<Points>;

    fn debit(&self, user: UserId, amount: Points) -> Result<()>;

    fn credit(&self, user: UserId, amount: Points) -> Result<()>;
}
