//! `hongbao create` / `claim` / `show` command implementations

use anyhow::{bail, Result};
use hongbao_core::{EnvelopeToken, HongbaoConfig, Points, SplitMode, UserId};
use hongbao_services::{CreateEnvelopeRequest, EnvelopeSummary};
use std::path::Path;

use super::{open_workspace, OutputFormat};

pub struct CreateArgs {
    pub funder: i64,
    pub funder_name: Option<String>,
    pub amount: Points,
    pub slices: u32,
    pub mode: SplitMode,
    pub target: Option<i64>,
    pub message: Option<String>,
}

pub fn create(state_dir: &Path, config: &HongbaoConfig, args: CreateArgs) -> Result<()> {
    let ws = open_workspace(state_dir, config)?;

    let funder = UserId(args.funder);
    let mut request = CreateEnvelopeRequest::new(funder, args.amount, args.slices).mode(args.mode);
    if let Some(name) = args.funder_name {
        request = request.funder_name(name);
    }
    if let Some(target) = args.target {
        request = request.targeted(UserId(target));
    }
    if let Some(message) = args.message {
        request = request.message(message);
    }

    let created = ws.service.create_envelope(request)?;

    println!("🧧 Envelope created");
    println!();
    println!("   Token:   {}", created.token);
    println!("   Amount:  {} points", created.total_amount);
    println!("   Slices:  {} ({})", created.total_slices, args.mode.as_str());
    if let Some(target) = args.target {
        println!("   For:     {target}");
    }
    println!("   Message: {}", created.message);
    println!();
    println!("Claim with: hongbao claim {} <user>", created.token);
    Ok(())
}

/// Reject tokens that could not have been minted before touching the state directory.
fn parse_token(raw: String) -> Result<EnvelopeToken> {
    let token = EnvelopeToken::new(raw.trim());
    if !token.is_well_formed() {
        bail!("'{raw}' is not an envelope token (expected 32 hex characters)");
    }
    Ok(token)
}

pub fn claim(
    state_dir: &Path,
    config: &HongbaoConfig,
    token: String,
    user: i64,
    name: Option<String>,
) -> Result<()> {
    let token = parse_token(token)?;
    let ws = open_workspace(state_dir, config)?;
    let name = name.unwrap_or_else(|| user.to_string());
    let outcome = ws.service.claim_envelope(&token, UserId(user), &name)?;

    println!(
        "🎉 {name} received {} points from {}'s envelope",
        outcome.amount, outcome.funder_name
    );
    println!(
        "   Slice {} of {}, {} left",
        outcome.slice_index, outcome.total_slices, outcome.remaining_slices
    );
    if outcome.is_finished {
        println!("   This was the last slice; the envelope is finished.");
    }
    if outcome.is_luckiest {
        println!("   🏆 Luckiest claim!");
    }
    Ok(())
}

pub fn show(state_dir: &Path, config: &HongbaoConfig, token: String, format: OutputFormat) -> Result<()> {
    let token = parse_token(token)?;
    let ws = open_workspace(state_dir, config)?;
    let summary = ws.service.envelope_summary(&token)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Human => print_summary(&summary),
    }
    Ok(())
}

pub(crate) fn print_summary(summary: &EnvelopeSummary) {
    let env = &summary.envelope;
    println!("🧧 {} ({})", env.token, env.status);
    println!("   From:    {}", env.funder_name);
    println!("   Message: {}", env.message);
    println!(
        "   Claimed: {}/{} points, {}/{} slices",
        summary.claimed_amount(),
        env.total_amount,
        env.claimed_slices(),
        env.total_slices
    );

    if summary.claims.is_empty() {
        return;
    }
    println!();
    for claim in &summary.claims {
        let crown = if claim.is_luckiest { " 🏆" } else { "" };
        println!(
            "   #{:<3} {:<16} {:>8}{crown}",
            claim.slice_index, claim.claimant_name, claim.amount
        );
    }
}
