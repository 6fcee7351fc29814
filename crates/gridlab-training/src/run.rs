use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use gridlab_abstraction::{BackendKind, Hyperparameters, TaskKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier for a run: `run_<UTC timestamp>_<random suffix>`.
///
/// The timestamp keeps ids roughly chronological; the suffix disambiguates runs
/// started within the same second, including across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("run_{stamp}_{}", &suffix[..8]))
    }

    /// Accept only names that are safe to join onto the runs directory.
    pub fn parse(raw: &str) -> TrainingResult<Self> {
        let valid = raw.starts_with("run_")
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid { Ok(Self(raw.to_string())) } else { Err(TrainingError::RunNotFound(raw.to_string())) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A result channel with its own latest pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Training,
    Testing,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::Training, Self::Testing];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Testing => "testing",
        }
    }

    /// File stem of the pointer record, e.g. `training-latest`.
    #[must_use]
    pub fn pointer_name(&self) -> String {
        format!("{}-latest", self.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.strip_suffix("-latest").unwrap_or(&normalized) {
            "training" | "train" => Ok(Self::Training),
            "testing" | "test" => Ok(Self::Testing),
            _ => Err(TrainingError::NotFound(format!("unknown channel '{s}'"))),
        }
    }
}

/// What a run does; determines which channel it publishes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunKind {
    Training,
    Evaluation {
        /// Storage id of the model being evaluated.
        source_model: String,
    },
}

impl RunKind {
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Training => Channel::Training,
            Self::Evaluation { .. } => Channel::Testing,
        }
    }
}

/// Everything needed to open a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub kind: RunKind,
    pub backend: BackendKind,
    pub task: TaskKind,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    pub dataset: String,
    pub label_column: String,
}

/// Persisted state of a run (`run.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    #[serde(flatten)]
    pub request: RunRequest,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.request.kind.channel()
    }
}

/// Returned to submitters; enough to poll a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: RunId,
    pub channel: Channel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_and_parseable() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("run_"));
        assert_eq!(RunId::parse(a.as_str()).unwrap(), a);
        assert!(RunId::parse("../etc").is_err());
        assert!(RunId::parse("run_../x").is_err());
    }

    #[test]
    fn test_channel_parsing_accepts_pointer_names() {
        assert_eq!("training-latest".parse::<Channel>().unwrap(), Channel::Training);
        assert_eq!("Testing".parse::<Channel>().unwrap(), Channel::Testing);
        assert!("staging".parse::<Channel>().is_err());
        assert_eq!(Channel::Testing.pointer_name(), "testing-latest");
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = RunRecord {
            run_id: RunId("run_x".to_string()),
            request: RunRequest {
                kind: RunKind::Evaluation { source_model: "run_a/model_run_a.json".to_string() },
                backend: BackendKind::Linear,
                task: TaskKind::Regression,
                hyperparameters: Hyperparameters::new(),
                dataset: "d.csv".to_string(),
                label_column: "label".to_string(),
            },
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["kind"]["type"], "evaluation");
        assert_eq!(json["backend"], "linear");
        let back: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.channel(), Channel::Testing);
    }
}
