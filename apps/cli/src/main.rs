//! GridLab CLI - train, evaluate and inspect grid models from the command line.
//!
//! This CLI provides a `gridlab` command that submits runs to the orchestrator,
//! waits for them, and reads published results out of the run store.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use gridlab_abstraction::{BackendKind, TaskKind};
use gridlab_training::Channel;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{catalog, results, simulate, train};

/// GridLab CLI - training-job orchestration with versioned results
#[derive(Parser, Debug)]
#[command(name = "gridlab", author, version, about = "GridLab - train and evaluate grid models")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Results directory (overrides GRIDLAB_RESULTS_DIR and config files)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Datasets directory (overrides GRIDLAB_DATASETS_DIR and config files)
    #[arg(long, global = true)]
    datasets: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on a dataset and publish it to the training channel
    Train {
        /// Dataset file name inside the datasets directory
        dataset: String,

        /// Label column
        #[arg(short = 'y', long, default_value = "label")]
        label: String,

        /// Backend (boosted-tree, random-forest, linear)
        #[arg(short, long, default_value = "boosted-tree")]
        backend: BackendKind,

        /// Task (regression, binary, multiclass)
        #[arg(short, long, default_value = "regression")]
        task: TaskKind,

        /// Hyperparameter as key=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Evaluate a saved model and publish to the testing channel
    Evaluate {
        /// Model storage id (see `gridlab models`)
        model: String,

        /// Dataset file name inside the datasets directory
        dataset: String,

        /// Label column
        #[arg(short = 'y', long, default_value = "label")]
        label: String,
    },

    /// Show one run record
    Status {
        /// Run id
        run_id: String,
    },

    /// Show the latest published result of a channel
    Latest {
        /// Channel (training, testing)
        #[arg(default_value = "training")]
        channel: Channel,
    },

    /// Fetch an image from the latest result of a channel
    Image {
        /// Channel (training, testing)
        channel: Channel,

        /// Image name, with or without the .svg extension
        name: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List saved models
    Models,

    /// List all runs
    Runs,

    /// List available datasets
    Datasets,

    /// List backend and task kinds
    Options,

    /// Predict every row of a dataset with a saved model
    Simulate {
        /// Model storage id (see `gridlab models`)
        model: String,

        /// Dataset file name inside the datasets directory
        dataset: String,

        /// Label column, shown next to predictions when present
        #[arg(short = 'y', long, default_value = "label")]
        label: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    if matches!(command, Command::Options) {
        return catalog::options(args.json);
    }

    let config = config::load_config(args.root, args.datasets)?;
    let orchestrator = gridlab_orchestrator::Orchestrator::new(config)?;
    let json = args.json;

    let outcome = match command {
        Command::Train { dataset, label, backend, task, params } => {
            let hyperparameters = train::parse_params(&params)?;
            let request = train::TrainArgs { dataset, label, backend, task, hyperparameters };
            train::train(&orchestrator, request, json).await
        }
        Command::Evaluate { model, dataset, label } => train::evaluate(&orchestrator, &model, &dataset, &label, json).await,
        Command::Status { run_id } => results::status(&orchestrator, &run_id, json),
        Command::Latest { channel } => results::latest(&orchestrator, channel, json),
        Command::Image { channel, name, output } => results::image(&orchestrator, channel, &name, output.as_deref()),
        Command::Models => catalog::models(&orchestrator, json),
        Command::Runs => catalog::runs(&orchestrator, json),
        Command::Datasets => catalog::datasets(&orchestrator, json),
        Command::Options => catalog::options(json),
        Command::Simulate { model, dataset, label } => {
            simulate::execute(&orchestrator, &model, &dataset, &label, json).await
        }
    };

    orchestrator.shutdown().await;
    outcome
}
