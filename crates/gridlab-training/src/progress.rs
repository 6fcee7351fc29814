use crate::run::RunId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Queued { run_id: RunId },
    Started { run_id: RunId },
    Message { run_id: RunId, message: String },
    Finished { run_id: RunId },
    Failed { run_id: RunId, error: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Queued { run_id } => info!(run_id = %run_id, "Run queued"),
            ProgressEvent::Started { run_id } => info!(run_id = %run_id, "Run started"),
            ProgressEvent::Message { run_id, message } => info!(run_id = %run_id, "{message}"),
            ProgressEvent::Finished { run_id } => info!(run_id = %run_id, "Run succeeded"),
            ProgressEvent::Failed { run_id, error } => warn!(run_id = %run_id, error = %error, "Run failed"),
        }
    }
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
