//! Muster - service lifecycle orchestration and workflow automation over MCP tools.
//!
//! Main entry point for the Muster CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use muster_config::{LoadedConfig, load_config_with_options};

mod commands;
mod core_tools;
mod runtime;

use commands::{class, config, serve, workflow};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Muster - run service classes and workflows against MCP tools
#[derive(Parser)]
#[command(name = "muster")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration directory (default: platform config dir + /muster)
    #[arg(long, global = true, env = "MUSTER_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator: connect tools, start configured instances, recover failures
    Serve(serve::ServeArgs),

    /// Workflow definitions and executions
    Workflow(workflow::WorkflowArgs),

    /// Service class definitions and their availability
    Class(class::ClassArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config_with_options(None, cli.config_dir.as_deref())?;
    let _guard = init_tracing(&loaded, cli.verbose);

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        loaded,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Workflow(args) => workflow::run(args, &ctx).await,
        Commands::Class(args) => class::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

/// Console (human-readable) plus daily rolling JSON file.
///
/// The returned guard flushes the file writer on drop; `None` when file
/// logging is off or the log directory cannot be used.
fn init_tracing(loaded: &LoadedConfig, verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let logging = loaded.config.logging();
    let console_filter = if verbose {
        "muster=debug,muster_orchestrator=debug,muster_workflow=debug,muster_mcp=debug,muster_store=debug,muster_events=debug,info".to_string()
    } else {
        format!("{},warn", scoped_level(&logging.level))
    };

    let log_dir = logging.dir_in(&loaded.config_dir);
    let appender = if logging.file {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("muster")
            .filename_suffix("log")
            .build(&log_dir)
            .map_err(|e| eprintln!("warning: file logging disabled ({}): {}", log_dir.display(), e))
            .ok()
    } else {
        None
    };
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(
                    "muster=trace,muster_orchestrator=trace,muster_workflow=trace,muster_mcp=debug,muster_store=debug,muster_events=trace,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(console_filter)),
        )
        .with(file_layer)
        .init();

    guard
}

/// Expand a bare level like `info` to every muster crate; pass directives through.
fn scoped_level(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    [
        "muster",
        "muster_orchestrator",
        "muster_workflow",
        "muster_mcp",
        "muster_store",
        "muster_events",
    ]
    .iter()
    .map(|target| format!("{}={}", target, level))
    .collect::<Vec<_>>()
    .join(",")
}
