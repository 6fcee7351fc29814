//! Orchestrator configuration.
//!
//! Values are layered: built-in defaults, then `~/.gridlab/config.toml`, then a local
//! `.gridlabrc`, then `GRIDLAB_*` environment variables. Command-line flags are applied
//! last by the binary.

use crate::error::{OrchestrationError, Result};
use gridlab_training::DatasetSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_RESULTS_DIR: &str = "GRIDLAB_RESULTS_DIR";
pub const ENV_DATASETS_DIR: &str = "GRIDLAB_DATASETS_DIR";
pub const ENV_WORKERS: &str = "GRIDLAB_WORKERS";

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root of the run store.
    pub results_dir: PathBuf,
    /// Directory scanned for `*.csv` datasets.
    pub datasets_dir: PathBuf,
    /// Columns dropped before training.
    pub metadata_columns: Vec<String>,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Per-job deadline; `None` runs every job to completion.
    pub job_timeout_secs: Option<u64>,
    pub simulate_row_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("test_results"),
            datasets_dir: PathBuf::from("datasets"),
            metadata_columns: DatasetSchema::default().metadata_columns().to_vec(),
            workers: 4,
            queue_capacity: 32,
            job_timeout_secs: None,
            simulate_row_limit: 2000,
        }
    }
}

/// One configuration file; every field is optional and overrides only what it sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
    #[serde(default)]
    pub datasets_dir: Option<PathBuf>,
    #[serde(default)]
    pub metadata_columns: Option<Vec<String>>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub simulate_row_limit: Option<usize>,
}

impl ConfigFile {
    /// Load a configuration file from TOML.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestrationError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| OrchestrationError::Config(format!("{}: {e}", path.display())))
    }
}

impl OrchestratorConfig {
    /// `~/.gridlab/config.toml`, if a home directory is known.
    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".gridlab").join("config.toml"))
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".gridlabrc")
    }

    /// Defaults overlaid with the global file, the local file and the environment.
    ///
    /// Missing files are skipped; a file that exists but does not parse is an error.
    pub fn discover() -> Result<Self> {
        let mut config = Self::default();
        let files = Self::default_global_path().into_iter().chain(std::iter::once(Self::default_local_path()));
        for path in files {
            if path.is_file() {
                debug!(path = %path.display(), "Loading configuration file");
                config.merge(&ConfigFile::load_from_file(&path)?);
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Values set in `file` override values in `self`.
    pub fn merge(&mut self, file: &ConfigFile) {
        if let Some(dir) = &file.results_dir {
            self.results_dir.clone_from(dir);
        }
        if let Some(dir) = &file.datasets_dir {
            self.datasets_dir.clone_from(dir);
        }
        if let Some(columns) = &file.metadata_columns {
            self.metadata_columns.clone_from(columns);
        }
        if let Some(workers) = file.workers {
            self.workers = workers;
        }
        if let Some(capacity) = file.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(secs) = file.job_timeout_secs {
            self.job_timeout_secs = Some(secs);
        }
        if let Some(limit) = file.simulate_row_limit {
            self.simulate_row_limit = limit;
        }
    }

    /// Apply `GRIDLAB_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_RESULTS_DIR).filter(|v| !v.is_empty()) {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_DATASETS_DIR).filter(|v| !v.is_empty()) {
            self.datasets_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            self.workers = raw
                .trim()
                .parse()
                .map_err(|_| OrchestrationError::Config(format!("{ENV_WORKERS}={raw:?} is not a worker count")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(OrchestrationError::Config("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(OrchestrationError::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(OrchestrationError::Config("job_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn schema(&self) -> DatasetSchema {
        DatasetSchema::new(self.metadata_columns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.simulate_row_limit, 2000);
        assert!(config.job_timeout().is_none());
        assert_eq!(config.metadata_columns, vec!["dataset_id", "log_id", "timestamp"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_file_overrides_only_what_it_sets() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
results_dir = "/srv/results"
workers = 2
job_timeout_secs = 90
metadata_columns = ["site"]
"#,
        )
        .unwrap();

        let mut config = OrchestratorConfig::default();
        config.merge(&ConfigFile::load_from_file(&path).unwrap());
        assert_eq!(config.results_dir, PathBuf::from("/srv/results"));
        assert_eq!(config.workers, 2);
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(90)));
        assert!(config.schema().is_metadata("site"));
        assert!(!config.schema().is_metadata("log_id"));
        assert_eq!(config.datasets_dir, PathBuf::from("datasets"));
        assert_eq!(config.queue_capacity, 32);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "wrokers = 3\n").unwrap();
        assert!(matches!(ConfigFile::load_from_file(&path), Err(OrchestrationError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([(ENV_WORKERS, "8"), (ENV_DATASETS_DIR, "/data")]);
        let mut config = OrchestratorConfig::default();
        config.apply_env(|key| env.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.datasets_dir, PathBuf::from("/data"));
        assert_eq!(config.results_dir, PathBuf::from("test_results"));

        let bad: HashMap<&str, &str> = HashMap::from([(ENV_WORKERS, "many")]);
        assert!(config.apply_env(|key| bad.get(key).map(|v| (*v).to_string())).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = OrchestratorConfig { workers: 0, ..OrchestratorConfig::default() };
        assert!(config.validate().is_err());
        let config = OrchestratorConfig { queue_capacity: 0, ..OrchestratorConfig::default() };
        assert!(config.validate().is_err());
    }
}
