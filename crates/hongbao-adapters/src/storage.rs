//! Envelope storage backend.
//!
//! `LocalEnvelopeStore` keeps the envelope and claim tables behind a single `RwLock`.
//! Each conditional operation runs inside one write critical section, which plays the
//! role of a database transaction: the compare-and-swap on the pool triple and the
//! unique claim insert either both apply or neither does.
//!
//! With [`LocalEnvelopeStore::open`] the tables are also persisted to
//! `<dir>/envelopes.json` after every mutation (write to a temp file, then rename). A
//! failed write rolls the in-memory tables back, so memory never runs ahead of disk.

use hongbao_core::{
    Claim, Envelope, EnvelopeStatus, EnvelopeStore, EnvelopeToken, HongbaoError, PoolState,
    Result, SliceCommit, SliceRevoke, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::atomic_write;

pub const SNAPSHOT_FILE: &str = "envelopes.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Tables {
    envelopes: BTreeMap<EnvelopeToken, Envelope>,
    claims: BTreeMap<EnvelopeToken, Vec<Claim>>,
}

impl Tables {
    fn claim_index(&self, token: &EnvelopeToken, claimant: UserId) -> Option<usize> {
        self.claims
            .get(token)
            .and_then(|rows| rows.iter().position(|c| c.claimant == claimant))
    }
}

pub struct LocalEnvelopeStore {
    tables: RwLock<Tables>,
    snapshot: Option<PathBuf>,
}

impl LocalEnvelopeStore {
    /// Ephemeral store (tests, simulations).
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot: None,
        }
    }

    /// File-backed store rooted at `dir`; loads an existing snapshot if present.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| HongbaoError::Storage(format!("failed to create {}: {e}", dir.display())))?;
        let path = dir.join(SNAPSHOT_FILE);

        let tables = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                HongbaoError::Storage(format!("corrupt snapshot {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => {
                return Err(HongbaoError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot: Some(path),
        })
    }

    pub fn envelope_count(&self) -> Result<usize> {
        Ok(self.read()?.envelopes.len())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| HongbaoError::Storage("envelope store lock poisoned".into()))
    }

    /// Run `f` as one transaction. `f` returns its result and whether it changed anything.
    fn transact<T>(&self, f: impl FnOnce(&mut Tables) -> Result<(T, bool)>) -> Result<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| HongbaoError::Storage("envelope store lock poisoned".into()))?;

        let Some(path) = &self.snapshot else {
            return f(&mut *tables).map(|(out, _)| out);
        };

        let backup = tables.clone();
        let (out, changed) = f(&mut *tables)?;
        if changed {
            let persisted = serde_json::to_vec_pretty(&*tables)
                .map_err(|e| HongbaoError::Storage(format!("failed to encode snapshot: {e}")))
                .and_then(|bytes| atomic_write(path, &bytes));
            if let Err(e) = persisted {
                *tables = backup;
                return Err(e);
            }
        }
        Ok(out)
    }
}

impl Default for LocalEnvelopeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeStore for LocalEnvelopeStore {
    fn insert_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.transact(|t| {
            if t.envelopes.contains_key(&envelope.token) {
                return Err(HongbaoError::Storage(format!(
                    "duplicate envelope token {}",
                    envelope.token
                )));
            }
            t.envelopes.insert(envelope.token.clone(), envelope.clone());
            Ok(((), true))
        })
    }

    fn envelope(&self, token: &EnvelopeToken) -> Result<Option<Envelope>> {
        Ok(self.read()?.envelopes.get(token).cloned())
    }

    fn has_claim(&self, token: &EnvelopeToken, claimant: UserId) -> Result<bool> {
        Ok(self.read()?.claim_index(token, claimant).is_some())
    }

    fn commit_slice(
        &self,
        token: &EnvelopeToken,
        expected: &PoolState,
        next: &PoolState,
        claim: &Claim,
    ) -> Result<SliceCommit> {
        self.transact(|t| {
            let current = t
                .envelopes
                .get(token)
                .ok_or(HongbaoError::EnvelopeNotFound)?
                .pool();
            if current != *expected {
                return Ok((SliceCommit::PoolChanged, false));
            }
            if t.claim_index(token, claim.claimant).is_some() {
                return Ok((SliceCommit::DuplicateClaimant, false));
            }

            let Some(env) = t.envelopes.get_mut(token) else {
                return Err(HongbaoError::EnvelopeNotFound);
            };
            env.apply_pool(next);
            env.slices_issued += 1;
            let slice_index = env.slices_issued;
            let mut row = claim.clone();
            row.slice_index = slice_index;
            t.claims.entry(token.clone()).or_default().push(row);
            Ok((SliceCommit::Committed { slice_index }, true))
        })
    }

    fn revoke_slice(&self, token: &EnvelopeToken, claimant: UserId) -> Result<SliceRevoke> {
        self.transact(|t| {
            let Some(idx) = t.claim_index(token, claimant) else {
                return Ok((SliceRevoke::NotFound, false));
            };
            let Some(env) = t.envelopes.get_mut(token) else {
                return Ok((SliceRevoke::NotFound, false));
            };
            if env.status != EnvelopeStatus::Active {
                return Ok((SliceRevoke::Closed(env.status), false));
            }
            let Some(rows) = t.claims.get_mut(token) else {
                return Ok((SliceRevoke::NotFound, false));
            };
            let claim = rows.remove(idx);
            env.remaining_amount += claim.amount;
            env.remaining_slices += 1;
            Ok((SliceRevoke::Revoked(claim), true))
        })
    }

    fn transition(
        &self,
        token: &EnvelopeToken,
        expected: &PoolState,
        next: &PoolState,
    ) -> Result<bool> {
        self.transact(|t| {
            let env = t
                .envelopes
                .get_mut(token)
                .ok_or(HongbaoError::EnvelopeNotFound)?;
            if env.pool() != *expected {
                return Ok((false, false));
            }
            env.apply_pool(next);
            Ok((true, true))
        })
    }

    fn claims(&self, token: &EnvelopeToken) -> Result<Vec<Claim>> {
        let mut rows = self.read()?.claims.get(token).cloned().unwrap_or_default();
        rows.sort_by(|a, b| {
            a.claimed_at_ms
                .cmp(&b.claimed_at_ms)
                .then(a.slice_index.cmp(&b.slice_index))
        });
        Ok(rows)
    }

    fn mark_luckiest(&self, token: &EnvelopeToken, claimant: UserId) -> Result<bool> {
        self.transact(|t| {
            let Some(rows) = t.claims.get_mut(token) else {
                return Ok((false, false));
            };
            if rows.iter().any(|c| c.is_luckiest) {
                return Ok((false, false));
            }
            match rows.iter_mut().find(|c| c.claimant == claimant) {
                Some(row) => {
                    row.is_luckiest = true;
                    Ok((true, true))
                }
                None => Ok((false, false)),
            }
        })
    }

    fn expired_active(&self, now_ms: i64, limit: usize) -> Result<Vec<Envelope>> {
        let tables = self.read()?;
        let mut due: Vec<Envelope> = tables
            .envelopes
            .values()
            .filter(|e| e.status == EnvelopeStatus::Active && e.is_past_expiry(now_ms))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.expires_at_ms);
        due.truncate(limit);
        Ok(due)
    }

    fn stalled_exhausted(&self, limit: usize) -> Result<Vec<Envelope>> {
        let tables = self.read()?;
        Ok(tables
            .envelopes
            .values()
            .filter(|e| e.status == EnvelopeStatus::Active && e.remaining_slices == 0)
            .take(limit)
            .cloned()
            .collect())
    }

    fn attach_message(&self, token: &EnvelopeToken, message_id: i64) -> Result<bool> {
        self.transact(|t| match t.envelopes.get_mut(token) {
            Some(env) => {
                env.message_id = Some(message_id);
                Ok((true, true))
            }
            None => Ok((false, false)),
        })
    }
}
