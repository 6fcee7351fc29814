//! Train and evaluate command implementations.

use super::{print_json, status_label};
use anyhow::{Context, Result, bail};
use colored::Colorize;
use gridlab_abstraction::{BackendKind, Hyperparameters, ParamValue, TaskKind};
use gridlab_orchestrator::Orchestrator;
use gridlab_training::{RunHandle, RunStatus};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct TrainArgs {
    pub dataset: String,
    pub label: String,
    pub backend: BackendKind,
    pub task: TaskKind,
    pub hyperparameters: Hyperparameters,
}

/// Parse repeated `key=value` flags; values are typed by [`ParamValue::infer`].
pub fn parse_params(raw: &[String]) -> Result<Hyperparameters> {
    let mut params = Hyperparameters::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .with_context(|| format!("Invalid hyperparameter '{item}', expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid hyperparameter '{item}', key is empty");
        }
        params.set(key, ParamValue::infer(value));
    }
    Ok(params)
}

pub async fn train(orchestrator: &Orchestrator, args: TrainArgs, json: bool) -> Result<()> {
    let handle = orchestrator
        .submit_training(&args.dataset, &args.label, args.backend, args.task, args.hyperparameters)
        .context("Failed to submit training run")?;
    if !json {
        println!(
            "{} {} ({} / {})",
            "Submitted".bold().cyan(),
            handle.run_id.as_str().cyan(),
            args.backend,
            args.task
        );
    }
    finish(orchestrator, &handle, json).await
}

pub async fn evaluate(orchestrator: &Orchestrator, model: &str, dataset: &str, label: &str, json: bool) -> Result<()> {
    let handle = orchestrator
        .submit_evaluation(model, dataset, label)
        .context("Failed to submit evaluation run")?;
    if !json {
        println!("{} {} ({})", "Submitted".bold().cyan(), handle.run_id.as_str().cyan(), model.dimmed());
    }
    finish(orchestrator, &handle, json).await
}

/// Wait for the run to finish and print its record.
///
/// Runs live in this process's worker pool, so the command always waits.
async fn finish(orchestrator: &Orchestrator, handle: &RunHandle, json: bool) -> Result<()> {
    let record = orchestrator.wait_for(&handle.run_id, POLL_INTERVAL).await?;

    if json {
        print_json(&serde_json::to_value(&record)?)?;
    } else {
        println!("  Run:     {}", record.run_id.as_str());
        println!("  Channel: {}", handle.channel);
        println!("  Status:  {}", status_label(record.status));
        if let Some(error) = &record.error {
            println!("  Error:   {}", error.red());
        }
        if record.status == RunStatus::Succeeded {
            println!();
            println!("  {}", format!("Next: gridlab latest {}", handle.channel).dimmed());
        }
    }

    if record.status == RunStatus::Failed {
        bail!("Run {} failed: {}", record.run_id, record.error.unwrap_or_default());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params_infers_types() {
        let params = parse_params(&["max_depth=4".to_string(), "eta = 0.1".to_string(), "bootstrap=false".to_string()])
            .unwrap();
        assert_eq!(params.get("max_depth"), Some(&ParamValue::Int(4)));
        assert_eq!(params.get("eta"), Some(&ParamValue::Float(0.1)));
        assert_eq!(params.get("bootstrap"), Some(&ParamValue::Bool(false)));
    }

    #[test]
    fn test_parse_params_rejects_malformed() {
        assert!(parse_params(&["depth".to_string()]).is_err());
        assert!(parse_params(&["=3".to_string()]).is_err());
    }
}
