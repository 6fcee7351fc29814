//! Run orchestration for GridLab.
//!
//! [`Orchestrator`] is the facade clients use: it validates submissions, hands them
//! to the bounded [`JobExecutor`], and reads published results back out of the run
//! store. Configuration is layered by [`OrchestratorConfig::discover`].

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;

pub use config::{ConfigFile, OrchestratorConfig};
pub use error::{OrchestrationError, Result};
pub use executor::{ExecutorConfig, Job, JobExecutor};
pub use orchestrator::{LatestResult, Options, Orchestrator};
