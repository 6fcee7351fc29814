//! CLI configuration loading.

use anyhow::{Context, Result};
use gridlab_orchestrator::OrchestratorConfig;
use std::path::PathBuf;

/// Load the orchestrator configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (`--root`, `--datasets`)
/// 2. Environment variables (`GRIDLAB_*`)
/// 3. Local config file (./.gridlabrc)
/// 4. Global config file (~/.gridlab/config.toml)
/// 5. Defaults
pub fn load_config(root: Option<PathBuf>, datasets: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::discover().context("Failed to load configuration")?;
    if let Some(root) = root {
        config.results_dir = root;
    }
    if let Some(datasets) = datasets {
        config.datasets_dir = datasets;
    }
    Ok(config)
}
