//! # Probe Host
//!
//! Entry point for the probe-drive motion controller host. Loads a run
//! configuration, brings up the run manager with all of its motion
//! groups (each motor on its own TCP session), and keeps them running
//! until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use probe_host::{RunConfig, RunManager};
use std::path::PathBuf;
use tracing::info;

/// Host process for networked probe-drive motion control.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a configured set of motion groups until interrupted.
    Run(RunArgs),
    /// Validate a configuration and print its motion-list summary
    /// without touching any motor.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the run configuration file.
    #[arg(short, long, default_value = "run.toml")]
    config_path: PathBuf,

    /// Keep running even if parts of the configuration fail to build.
    #[arg(long)]
    build_mode: bool,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Path to the run configuration file.
    #[arg(short, long, default_value = "run.toml")]
    config_path: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Check(args) => check(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    info!("loading configuration from {:?}", args.config_path);
    let mut manager = RunManager::from_path(&args.config_path, args.build_mode)
        .with_context(|| format!("failed to start run from {:?}", args.config_path))?;
    info!(
        run = manager.name(),
        groups = manager.len(),
        "run manager started"
    );

    // Park until ctrl-c; the signal future lives on the manager's own
    // event loop.
    let run_loop = manager.run_loop().clone();
    let interrupted = run_loop.submit("ctrl-c", async {
        let _ = tokio::signal::ctrl_c().await;
    });
    let _ = interrupted.result(None);

    info!("shutdown signal received, stopping all motion");
    manager.stop_all();
    manager.terminate(false);
    Ok(())
}

fn check(args: CheckArgs) -> Result<()> {
    let config = RunConfig::from_path(&args.config_path)
        .with_context(|| format!("failed to load {:?}", args.config_path))?;

    let name = config.name.as_deref().unwrap_or("<unnamed>");
    println!("run: {name}");

    let mut failures = 0usize;
    for group in &config.motion_groups {
        match group.validate() {
            Ok(()) => {
                let mut builder = group
                    .motion_builder
                    .build()
                    .context("motion builder construction")?;
                let points = builder.motion_list().map(|list| list.len()).unwrap_or(0);
                println!(
                    "  group {:?}: {} axes, {} motion-list points",
                    group.name,
                    group.drive.axes.len(),
                    points
                );
            }
            Err(err) => {
                failures += 1;
                println!("  group {:?}: INVALID - {err}", group.name);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} motion group(s) failed validation");
    }
    println!("configuration OK");
    Ok(())
}
