//! CLI command implementations

pub mod envelope;
pub mod ledger;
pub mod simulate;
pub mod sweep;

use anyhow::{bail, Context, Result};
use hongbao_adapters::{LocalEnvelopeStore, LocalPointsLedger};
use hongbao_core::HongbaoConfig;
use hongbao_services::RedEnvelopeService;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load config from file, or from `HONGBAO_*` variables when no file exists.
pub fn load_config(path: Option<PathBuf>) -> Result<HongbaoConfig> {
    let path = path.unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hongbao")
            .join("config.json")
    });

    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Ok(HongbaoConfig::from_json(&content)?)
    } else {
        Ok(HongbaoConfig::from_env()?)
    }
}

/// File-backed service rooted at `state_dir`, plus a handle on its ledger for grants.
pub struct Workspace {
    pub service: RedEnvelopeService,
    pub ledger: Arc<LocalPointsLedger>,
}

pub fn open_workspace(state_dir: &Path, config: &HongbaoConfig) -> Result<Workspace> {
    let store = LocalEnvelopeStore::open(state_dir)
        .with_context(|| format!("Failed to open envelope store in {}", state_dir.display()))?;
    let ledger = Arc::new(
        LocalPointsLedger::open(state_dir)
            .with_context(|| format!("Failed to open ledger in {}", state_dir.display()))?,
    );
    let service =
        RedEnvelopeService::new(config.envelope.clone(), Arc::new(store), ledger.clone());
    Ok(Workspace { service, ledger })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => bail!("unknown output format '{other}' (expected human or json)"),
        }
    }
}
