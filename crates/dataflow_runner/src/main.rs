// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow graph runner.
//!
//! Loads a graph document with the builtin and standard node factories,
//! compiles it, executes it once and logs the values reaching the graph's
//! exposed outputs and its sink nodes.

mod config;
mod report;

use clap::Parser;
use config::{ConfigError, RunnerConfig, DEFAULT_CONFIG_FILE};
use dataflow_graph::nodes::standard_factory;
use dataflow_graph::{CompileError, DataflowGraph, ExecutionError, FactoryError, NodeFactorySet};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "dataflow_runner")]
#[command(about = "Load, compile and execute a dataflow graph document")]
struct Cli {
    /// Graph document (JSON); defaults to the `graph` entry of the configuration
    graph: Option<PathBuf>,

    /// Runner configuration file (RON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the loaded document before running
    #[arg(long)]
    dump: bool,
}

/// Failure of a runner invocation
#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("No graph document given on the command line or in the configuration")]
    MissingGraph,

    #[error(transparent)]
    Document(#[from] FactoryError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = match load_config(&cli, &config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dataflow runner v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&cli, &config) {
        tracing::error!("Run failed: {e}");
        std::process::exit(1);
    }
}

/// An explicit `--config` must exist; the default file is optional
fn load_config(cli: &Cli, path: &Path) -> Result<RunnerConfig, ConfigError> {
    if cli.config.is_some() {
        RunnerConfig::load(path)
    } else {
        RunnerConfig::load_or_default(path)
    }
}

fn run(cli: &Cli, config: &RunnerConfig) -> Result<(), RunError> {
    let path = cli.graph.as_ref().or(config.graph.as_ref()).ok_or(RunError::MissingGraph)?;

    let mut factories = NodeFactorySet::new();
    factories.add_factory(standard_factory()?)?;

    let mut graph = DataflowGraph::load_from_file(path, &factories)?;
    if cli.dump || config.dump_document {
        println!("{}", graph.save_to_string(factories.port_types())?);
    }

    graph.compile()?;
    if let Some(order) = graph.compiled_order() {
        tracing::info!("Execution order: {}", order.join(" -> "));
    }
    graph.execute()?;

    for line in report::summarize(&graph) {
        tracing::info!("{line}");
    }
    Ok(())
}
