//! Run status, latest result and image commands.

use super::{print_json, status_label};
use anyhow::{Context, Result};
use colored::Colorize;
use gridlab_orchestrator::{LatestResult, Orchestrator};
use gridlab_training::Channel;
use std::io::Write;
use std::path::Path;

pub fn status(orchestrator: &Orchestrator, run_id: &str, json: bool) -> Result<()> {
    let record = orchestrator.get_run(run_id)?;
    if json {
        return print_json(&serde_json::to_value(&record)?);
    }

    println!();
    println!("{}", format!("Run {}", record.run_id).bold().cyan());
    println!("  Kind:     {}", record.channel());
    println!("  Backend:  {}", record.request.backend);
    println!("  Task:     {}", record.request.task);
    println!("  Dataset:  {} (label: {})", record.request.dataset, record.request.label_column);
    println!("  Status:   {}", status_label(record.status));
    println!("  Created:  {}", record.created_at.to_rfc3339());
    if let Some(at) = record.completed_at {
        println!("  Finished: {}", at.to_rfc3339());
    }
    if let Some(error) = &record.error {
        println!("  Error:    {}", error.red());
    }
    println!();
    Ok(())
}

pub fn latest(orchestrator: &Orchestrator, channel: Channel, json: bool) -> Result<()> {
    let result = orchestrator.get_result(channel)?;
    if json {
        return print_json(&serde_json::to_value(&result)?);
    }

    match result {
        LatestResult::Pending => {
            println!("{} {}", channel.to_string().bold(), "pending".dimmed());
            println!("  {}", "Nothing has been published on this channel yet.".dimmed());
        }
        LatestResult::Ready(published) => {
            println!("{} {}", channel.to_string().bold(), "ready".green());
            println!("  Run:       {}", published.run.run_id.as_str().cyan());
            println!("  Published: {}", published.published_at.to_rfc3339());
            println!();
            println!("{}", published.report.trim_end());
            println!();
            if !published.images.is_empty() {
                println!("{}", "Images".bold());
                for image in &published.images {
                    println!("  {image}");
                }
            }
        }
    }
    Ok(())
}

pub fn image(orchestrator: &Orchestrator, channel: Channel, name: &str, output: Option<&Path>) -> Result<()> {
    let bytes = orchestrator.fetch_image(channel, name)?;
    match output {
        Some(path) => {
            std::fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}
