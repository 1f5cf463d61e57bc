//! `hongbao sweep` command implementation

use anyhow::Result;
use hongbao_core::HongbaoConfig;
use std::path::Path;

use super::open_workspace;

pub fn run(state_dir: &Path, config: &HongbaoConfig) -> Result<()> {
    let ws = open_workspace(state_dir, config)?;
    let report = ws.service.sweep_expired()?;

    if report.examined == 0 {
        println!("No expired envelopes.");
        return Ok(());
    }

    println!("🧹 Expiry sweep");
    for expired in &report.expired {
        println!(
            "   {} expired, refunded {} points to {}",
            expired.token, expired.refunded, expired.funder
        );
    }
    if report.repaired > 0 {
        println!("   {} exhausted envelope(s) finished", report.repaired);
    }
    if report.failures > 0 {
        println!("   ⚠️  {} envelope(s) failed; see logs", report.failures);
    }
    println!("   Total refunded: {} points", report.refunded_points());
    Ok(())
}
