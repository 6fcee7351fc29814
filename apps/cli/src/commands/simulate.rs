//! Simulate command implementation.

use super::print_json;
use anyhow::{Context, Result};
use colored::Colorize;
use gridlab_orchestrator::Orchestrator;

pub async fn execute(orchestrator: &Orchestrator, model: &str, dataset: &str, label: &str, json: bool) -> Result<()> {
    let rows = orchestrator
        .simulate(model, dataset, label)
        .await
        .with_context(|| format!("Failed to simulate {model} on {dataset}"))?;
    if json {
        return print_json(&serde_json::to_value(&rows)?);
    }

    println!("{:>6} {:>14} {:>14}", "row", "predicted", "actual");
    for row in &rows {
        let actual = row.actual.map_or_else(|| "-".to_string(), |a| format!("{a:.4}"));
        let marker = match row.actual {
            Some(actual) if (actual - row.predicted).abs() > f64::EPSILON => "*".red(),
            _ => " ".normal(),
        };
        println!("{:>6} {:>14.4} {:>14} {marker}", row.row, row.predicted, actual);
    }
    eprintln!("{}", format!("{} rows (limit {})", rows.len(), orchestrator.config().simulate_row_limit).dimmed());
    Ok(())
}
