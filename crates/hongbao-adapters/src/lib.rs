//! Storage and ledger backends for the red-envelope engine.
//!
//! - **LocalEnvelopeStore**: envelope + claim tables, in memory or snapshotted to disk
//! - **LocalPointsLedger**: point balances with conditional debit, in memory or on disk

use hongbao_core::{HongbaoError, Result};
use std::fs;
use std::path::Path;

pub mod ledger;
pub mod storage;

pub use ledger::LocalPointsLedger;
pub use storage::LocalEnvelopeStore;

/// Replace `path` with `bytes` via a sibling temp file and rename.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)
        .map_err(|e| HongbaoError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| HongbaoError::Storage(format!("failed to replace {}: {e}", path.display())))
}
