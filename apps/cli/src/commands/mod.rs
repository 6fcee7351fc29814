//! Command implementations for the GridLab CLI.

pub mod catalog;
pub mod results;
pub mod simulate;
pub mod train;

use anyhow::Result;
use colored::{ColoredString, Colorize};
use gridlab_training::RunStatus;
use serde_json::Value;

pub(crate) fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().dimmed(),
        RunStatus::Running => status.as_str().yellow(),
        RunStatus::Succeeded => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
    }
}
