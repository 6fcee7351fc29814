//! Listing commands: models, runs, datasets and options.

use super::{print_json, status_label};
use anyhow::Result;
use colored::Colorize;
use gridlab_orchestrator::Orchestrator;
use serde_json::json;

pub fn models(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let models = orchestrator.list_registry()?;
    if json {
        return print_json(&serde_json::to_value(&models)?);
    }

    println!();
    println!("{}", format!("Saved Models ({})", models.len()).bold().cyan());
    println!();
    if models.is_empty() {
        println!("  {}", "No saved models. Train one with `gridlab train <dataset>`.".dimmed());
        return Ok(());
    }

    println!("{:<60} {:<14} {}", "Storage ID", "Backend", "Task");
    println!("{}", "─".repeat(90));
    for model in models {
        println!("{:<60} {:<14} {}", model.storage_id.cyan(), model.backend.to_string(), model.task);
    }
    println!();
    Ok(())
}

pub fn runs(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let runs = orchestrator.list_runs()?;
    if json {
        return print_json(&serde_json::to_value(&runs)?);
    }

    println!();
    println!("{}", format!("Runs ({})", runs.len()).bold().cyan());
    println!();
    for run in runs {
        println!(
            "{:<34} {:<9} {:<14} {:<11} {}",
            run.run_id.as_str(),
            run.channel().as_str(),
            run.request.backend.as_str(),
            status_label(run.status),
            run.request.dataset.dimmed()
        );
    }
    println!();
    Ok(())
}

pub fn datasets(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let datasets = orchestrator.list_datasets()?;
    if json {
        return print_json(&json!(datasets));
    }
    if datasets.is_empty() {
        println!("{}", format!("No datasets in {}", orchestrator.config().datasets_dir.display()).dimmed());
    }
    for dataset in datasets {
        println!("{dataset}");
    }
    Ok(())
}

pub fn options(json: bool) -> Result<()> {
    let options = Orchestrator::options();
    if json {
        return print_json(&serde_json::to_value(&options)?);
    }
    let backends: Vec<&str> = options.backends.iter().map(|b| b.as_str()).collect();
    let tasks: Vec<&str> = options.tasks.iter().map(|t| t.as_str()).collect();
    println!("{} {}", "Backends:".bold(), backends.join(", "));
    println!("{} {}", "Tasks:".bold(), tasks.join(", "));
    Ok(())
}
