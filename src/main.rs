//! Headless contention runner
//!
//! Runs simulated sessions against one authority server and reports whether
//! any object ever had two confirmed holders.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use holdfast::core::config::SessionConfig;
use holdfast::core::error::Result;
use holdfast::sim::{SimConfig, SimHarness, SimReport};

/// Contention runner - random grabs, releases and collisions over a lossy-latency network
#[derive(Parser, Debug)]
#[command(name = "holdfast")]
#[command(about = "Simulate contended grabs and check single-writer ownership")]
struct Args {
    /// Participants per session
    #[arg(long, default_value_t = 4)]
    peers: u32,

    /// Shared objects per session
    #[arg(long, default_value_t = 3)]
    objects: u32,

    /// Random steps before settling
    #[arg(long, default_value_t = 500)]
    ticks: u64,

    /// Independent sessions to run
    #[arg(long, default_value_t = 8)]
    trials: u32,

    /// Base seed; trial N uses seed + N
    #[arg(long)]
    seed: Option<u64>,

    /// One-way latency in steps
    #[arg(long, default_value_t = 3)]
    latency: u64,

    /// Extra random delay in steps
    #[arg(long, default_value_t = 2)]
    jitter: u64,

    /// Session config TOML (protocol timeouts, anticipation window)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format: json or text
    #[arg(long, default_value = "json")]
    format: String,
}

#[derive(Serialize)]
struct TrialResult {
    trial: u32,
    seed: u64,
    #[serde(flatten)]
    report: SimReport,
}

#[derive(Serialize)]
struct RunSummary {
    trials: Vec<TrialResult>,
    total_claims: u64,
    total_violations: usize,
    total_diverged: u32,
}

fn run(args: &Args) -> Result<RunSummary> {
    let session_config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let base_seed = args.seed.unwrap_or_else(rand::random);

    tracing::info!(
        peers = args.peers,
        objects = args.objects,
        trials = args.trials,
        seed = base_seed,
        "starting contention run"
    );

    let trials = (0..args.trials)
        .into_par_iter()
        .map(|trial| -> Result<TrialResult> {
            let seed = base_seed.wrapping_add(u64::from(trial));
            let config = SimConfig {
                peers: args.peers,
                objects: args.objects,
                latency_ticks: args.latency,
                jitter_ticks: args.jitter,
                seed,
                ..SimConfig::default()
            };
            let report = SimHarness::new(config, &session_config)?.run(args.ticks)?;
            tracing::debug!(trial, claims = report.claims, "trial finished");
            Ok(TrialResult {
                trial,
                seed,
                report,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RunSummary {
        total_claims: trials.iter().map(|t| t.report.claims).sum(),
        total_violations: trials.iter().map(|t| t.report.violations.len()).sum(),
        total_diverged: trials.iter().map(|t| t.report.diverged).sum(),
        trials,
    })
}

fn print_text(summary: &RunSummary) {
    println!("=== Contention Run ===");
    for trial in &summary.trials {
        let r = &trial.report;
        println!(
            "trial {:>3} seed {:>20}: {} claims ({} accepted, {} rejected), {} releases, {} violations, {} diverged",
            trial.trial,
            trial.seed,
            r.claims,
            r.accepted,
            r.rejected,
            r.releases,
            r.violations.len(),
            r.diverged
        );
        for v in &r.violations {
            println!("    step {} object {:?} held by {:?}", v.step, v.object, v.holders);
        }
    }
    println!(
        "total: {} claims, {} violations, {} diverged",
        summary.total_claims, summary.total_violations, summary.total_diverged
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("holdfast=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let summary = match run(&args) {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("run failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.format == "text" {
        print_text(&summary);
    } else {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                tracing::error!("failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if summary.total_violations > 0 || summary.total_diverged > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
