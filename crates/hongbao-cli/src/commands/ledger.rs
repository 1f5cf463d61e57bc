//! `hongbao grant` / `hongbao balance` command implementations

use anyhow::{Context, Result};
use hongbao_core::{HongbaoConfig, Points, PointsLedger, UserId};
use std::path::Path;

use super::open_workspace;

pub fn grant(state_dir: &Path, config: &HongbaoConfig, user: i64, amount: Points) -> Result<()> {
    let ws = open_workspace(state_dir, config)?;
    let balance = ws
        .ledger
        .grant(UserId(user), amount)
        .context("Failed to grant points")?;

    println!("✅ Granted {amount} points to {user}");
    println!("   Balance: {balance}");
    Ok(())
}

pub fn balance(state_dir: &Path, config: &HongbaoConfig, user: i64) -> Result<()> {
    let ws = open_workspace(state_dir, config)?;
    let balance = ws.ledger.balance(UserId(user))?;
    println!("{user}: {balance} points");
    Ok(())
}
