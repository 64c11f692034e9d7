//! reapd — the reap batch scheduler.
//!
//! Runs the scheduler's entry points (rank, prepare, run) against a
//! scenario file through the deterministic simulation environment, so
//! schedules can be inspected and tuned before pointing the library at a
//! live deployment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reap_scheduler::sim::{SimEnvironment, SimScenario};
use reap_scheduler::{orchestrator, prepare, rank, SchedulerConfig};

#[derive(Parser)]
#[command(name = "reapd", about = "Continuous batch scheduler for remote targets")]
struct Cli {
    /// Scenario file describing the actor, targets, and worker fleet.
    #[arg(long, env = "REAP_SCENARIO")]
    scenario: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank candidate targets by amortized yield rate.
    Rank {
        /// Show only the top N rows.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Drive a target to baseline.
    Prepare {
        target: String,
    },
    /// Prepare a target, then run batch cycles against it.
    Run {
        target: String,
        /// Extraction threshold override; defaults to the searched optimum.
        #[arg(long)]
        threshold: Option<f64>,
        /// Planning passes to run before exiting.
        #[arg(long, default_value_t = 5)]
        cycles: u32,
        /// Keep multiple batches in flight at the searched depth.
        #[arg(long)]
        high_throughput: bool,
    },
}

#[derive(Tabled)]
struct RankRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Yield/s")]
    rate: String,
    #[tabled(rename = "Batches")]
    batches: u32,
    #[tabled(rename = "Batch GB")]
    batch_memory: String,
    #[tabled(rename = "Prep (s)")]
    prep: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SchedulerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading scenario {}", cli.scenario.display()))?;
    let scenario: SimScenario = toml::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", cli.scenario.display()))?;
    let candidates: Vec<String> = scenario.targets.iter().map(|t| t.name.clone()).collect();
    config.cores = scenario.cores;

    let env = SimEnvironment::new(scenario);
    let model = env.model().clone();

    match cli.command {
        Command::Rank { limit } => {
            let evaluations = rank::rank_targets(&env, &model, &config, &candidates).await?;
            let rows: Vec<RankRow> = evaluations
                .iter()
                .take(limit.unwrap_or(usize::MAX))
                .enumerate()
                .map(|(i, e)| RankRow {
                    rank: i + 1,
                    target: e.name.clone(),
                    threshold: format!("{:.2}%", e.threshold * 100.0),
                    rate: format!("{:.0}", e.rate_per_sec),
                    batches: e.batches,
                    batch_memory: format!("{:.1}", e.batch_memory),
                    prep: format!("{:.1}", e.prep_ms / 1_000.0),
                })
                .collect();
            if rows.is_empty() {
                println!("no viable targets");
            } else {
                println!("{}", Table::new(rows));
            }
        }
        Command::Prepare { target } => {
            let outcome = prepare::prepare(&env, &model, &config, &target).await?;
            info!(
                target,
                iterations = outcome.iterations,
                elapsed_s = outcome.elapsed_ms / 1_000.0,
                "Preparation complete"
            );
        }
        Command::Run {
            target,
            threshold,
            cycles,
            high_throughput,
        } => {
            config.high_throughput = high_throughput;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(true);
                }
            });

            let outcome = prepare::prepare(&env, &model, &config, &target).await?;
            info!(
                target,
                iterations = outcome.iterations,
                elapsed_s = outcome.elapsed_ms / 1_000.0,
                "Target prepared; starting batch cycles"
            );

            let stats = orchestrator::run_batches(
                &env,
                &model,
                &config,
                &target,
                threshold,
                Some(cycles),
                shutdown_rx,
            )
            .await?;
            info!(
                target,
                cycles = stats.cycles,
                skipped = stats.skipped_cycles,
                batches = stats.batches_dispatched,
                predicted_yield = stats.predicted_yield,
                "Run complete"
            );
        }
    }

    Ok(())
}
