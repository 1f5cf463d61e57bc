//! Hongbao CLI - red-envelope points giveaways
//!
//! Operator interface for funding, claiming and sweeping envelopes over a local,
//! file-backed state directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hongbao_core::{HongbaoConfig, Points, SplitMode};
use std::path::PathBuf;

mod commands;

use commands::envelope::CreateArgs;
use commands::simulate::SimulationArgs;
use commands::OutputFormat;

/// Hongbao: funded point pools split among claimants
#[derive(Parser)]
#[command(name = "hongbao")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, env = "HONGBAO_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the envelope store and ledger
    #[arg(long, global = true, env = "HONGBAO_STATE_DIR", default_value = ".hongbao")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add points to a user's balance
    Grant {
        user: i64,
        amount: Points,
    },

    /// Show a user's balance
    Balance {
        user: i64,
    },

    /// Fund a new envelope
    Create {
        /// Funding user
        #[arg(long)]
        funder: i64,

        /// Display name of the funder
        #[arg(long)]
        funder_name: Option<String>,

        /// Total points in the envelope
        #[arg(long)]
        amount: Points,

        /// Number of slices
        #[arg(long)]
        slices: u32,

        /// Split mode (random, equal)
        #[arg(long, default_value = "random")]
        mode: SplitMode,

        /// Restrict the envelope to a single recipient
        #[arg(long)]
        target: Option<i64>,

        /// Greeting shown with the envelope
        #[arg(long)]
        message: Option<String>,
    },

    /// Claim a slice of an envelope
    Claim {
        token: String,
        user: i64,

        /// Display name of the claimant
        #[arg(long)]
        name: Option<String>,
    },

    /// Show an envelope and its claims
    Show {
        token: String,

        /// Output format (json, human)
        #[arg(short, long, default_value = "human")]
        format: OutputFormat,
    },

    /// Expire overdue envelopes and refund their remainders
    Sweep,

    /// Race concurrent claimants against one in-memory envelope
    Simulate {
        #[arg(long)]
        amount: Points,

        #[arg(long)]
        slices: u32,

        #[arg(long)]
        claimants: usize,

        /// Split mode (random, equal)
        #[arg(long, default_value = "random")]
        mode: SplitMode,

        /// RNG seed for reproducible splits
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_logging(verbose: bool, config: &HongbaoConfig) {
    let filter = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config)?;

    init_logging(cli.verbose, &config);

    let state_dir = cli.state_dir.as_path();
    match cli.command {
        Commands::Grant { user, amount } => commands::ledger::grant(state_dir, &config, user, amount),
        Commands::Balance { user } => commands::ledger::balance(state_dir, &config, user),
        Commands::Create {
            funder,
            funder_name,
            amount,
            slices,
            mode,
            target,
            message,
        } => commands::envelope::create(
            state_dir,
            &config,
            CreateArgs {
                funder,
                funder_name,
                amount,
                slices,
                mode,
                target,
                message,
            },
        ),
        Commands::Claim { token, user, name } => {
            commands::envelope::claim(state_dir, &config, token, user, name)
        }
        Commands::Show { token, format } => {
            commands::envelope::show(state_dir, &config, token, format)
        }
        Commands::Sweep => commands::sweep::run(state_dir, &config),
        Commands::Simulate {
            amount,
            slices,
            claimants,
            mode,
            seed,
        } => commands::simulate::run(
            &config,
            SimulationArgs {
                amount,
                slices,
                claimants,
                mode,
                seed,
            },
        ),
    }
}
