//! Points ledger backend.
//!
//! Balances live behind one `Mutex`, so `debit` is a true conditional update
//! (`UPDATE ... SET balance = balance - n WHERE balance >= n`): two concurrent debits by
//! the same funder can never both pass the balance check.

use hongbao_core::{HongbaoError, Points, PointsLedger, Result, UserId};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::atomic_write;

pub const LEDGER_FILE: &str = "ledger.json";

pub struct LocalPointsLedger {
    balances: Mutex<BTreeMap<UserId, Points>>,
    snapshot: Option<PathBuf>,
}

impl LocalPointsLedger {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(BTreeMap::new()),
            snapshot: None,
        }
    }

    /// File-backed ledger rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| HongbaoError::Storage(format!("failed to create {}: {e}", dir.display())))?;
        let path = dir.join(LEDGER_FILE);

        let balances = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                HongbaoError::Storage(format!("corrupt ledger {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(HongbaoError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            balances: Mutex::new(balances),
            snapshot: Some(path),
        })
    }

    /// Seed or top up a balance (operator grants, tests).
    pub fn grant(&self, user: UserId, amount: Points) -> Result<Points> {
        let mut balances = self.lock()?;
        let previous = balances.get(&user).copied().unwrap_or(0);
        let updated = previous
            .checked_add(amount)
            .ok_or_else(|| HongbaoError::InvalidRequest(format!("balance overflow for {user}")))?;
        balances.insert(user, updated);
        if let Err(e) = self.persist(&balances) {
            balances.insert(user, previous);
            return Err(e);
        }
        Ok(updated)
    }

    /// Sum of all balances (conservation checks).
    pub fn total_supply(&self) -> Result<Points> {
        Ok(self.lock()?.values().sum())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<UserId, Points>>> {
        self.balances
            .lock()
            .map_err(|_| HongbaoError::Storage("ledger lock poisoned".into()))
    }

    fn persist(&self, balances: &BTreeMap<UserId, Points>) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(balances)
            .map_err(|e| HongbaoError::Storage(format!("failed to encode ledger: {e}")))?;
        atomic_write(path, &bytes)
    }
}

impl Default for LocalPointsLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PointsLedger for LocalPointsLedger {
    fn balance(&self, user: UserId) -> Result<Points> {
        Ok(self.lock()?.get(&user).copied().unwrap_or(0))
    }

    fn debit(&self, user: UserId, amount: Points) -> Result<()> {
        let mut balances = self.lock()?;
        let available = balances.get(&user).copied().unwrap_or(0);
        if available < amount {
            debug!(user = %user, available, required = amount, "debit rejected");
            return Err(HongbaoError::InsufficientBalance {
                available,
                required: amount,
            });
        }
        balances.insert(user, available - amount);
        if let Err(e) = self.persist(&balances) {
            balances.insert(user, available);
            return Err(e);
        }
        Ok(())
    }

    fn credit(&self, user: UserId, amount: Points) -> Result<()> {
        self.grant(user, amount).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn debit_is_conditional() {
        let ledger = LocalPointsLedger::new();
        ledger.grant(UserId(1), 50).unwrap();

        assert_eq!(
            ledger.debit(UserId(1), 60),
            Err(HongbaoError::InsufficientBalance {
                available: 50,
                required: 60
            })
        );
        assert_eq!(ledger.balance(UserId(1)).unwrap(), 50);

        ledger.debit(UserId(1), 50).unwrap();
        assert_eq!(ledger.balance(UserId(1)).unwrap(), 0);
    }

    #[test]
    fn unknown_user_has_zero_balance() {
        let ledger = LocalPointsLedger::new();
        assert_eq!(ledger.balance(UserId(404)).unwrap(), 0);
        assert!(ledger.debit(UserId(404), 1).is_err());
    }

    #[test]
    fn concurrent_debits_never_overspend() {
        let ledger = Arc::new(LocalPointsLedger::new());
        ledger.grant(UserId(1), 100).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let l = Arc::clone(&ledger);
                thread::spawn(move || l.debit(UserId(1), 30).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(ledger.balance(UserId(1)).unwrap(), 10);
    }

    #[test]
    fn file_backed_ledger_survives_reopen() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        {
            let ledger = LocalPointsLedger::open(dir.path()).unwrap();
            ledger.grant(UserId(5), 40).unwrap();
            ledger.debit(UserId(5), 15).unwrap();
            ledger.credit(UserId(6), 3).unwrap();
        }
        let reopened = LocalPointsLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.balance(UserId(5)).unwrap(), 25);
        assert_eq!(reopened.balance(UserId(6)).unwrap(), 3);
        assert_eq!(reopened.total_supply().unwrap(), 28);
    }
}
