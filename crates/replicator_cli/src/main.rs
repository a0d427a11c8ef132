//! Process entry point: parse arguments, load config, run every scheme to
//! completion. A thin shell around [`replicator_core::orchestrator`] -
//! mirrors the reference tool's `timeds.py`, which does argument parsing,
//! config loading, and a `SchemeReplicator.run()` call per scheme and
//! nothing else.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use replicator_core::{config::Config, logger, orchestrator, worker::WorkerMode};
use tokio_util::sync::CancellationToken;

/// Replicates database content between a source and target host using a
/// monotonic ordering column to resume incremental copying.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the scheme configuration file.
    #[arg(long, default_value = "conf.json")]
    config: PathBuf,

    /// Print the parsed, validated configuration and exit without running
    /// any worker.
    #[arg(short, long)]
    verbose: bool,

    /// Run only the views and dynamic-table passes, skipping the
    /// incremental copy loop.
    #[arg(short = 'd', long = "only-dynamic-and-views")]
    only_dynamic_and_views: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if args.verbose {
        println!("{config:#?}");
        return ExitCode::SUCCESS;
    }

    logger::init_subscriber();

    let mode = if args.only_dynamic_and_views {
        WorkerMode::OnlyDynamicAndViews
    } else {
        WorkerMode::Full
    };

    let cancellation = CancellationToken::new();
    let shutdown = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, stopping before the next batch");
            shutdown.cancel();
        }
    });

    let outcomes = orchestrator::run_all_schemes(&config, mode, &cancellation).await;

    // Per-table and per-worker failures are logged by the orchestrator as
    // they happen and never fail the process (§7); only a scheme that
    // couldn't even open its source connection is worth a non-zero exit.
    let mut exit = ExitCode::SUCCESS;
    for outcome in &outcomes {
        if outcome.bootstrap_error.is_some() && outcome.workers.is_empty() {
            exit = ExitCode::FAILURE;
        }
    }
    exit
}
