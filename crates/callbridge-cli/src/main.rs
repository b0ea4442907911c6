//! Callbridge Suite Runner
//!
//! Runs the built-in ordered suites against the in-memory service.

use anyhow::{Context, Result};
use callbridge_core::{HarnessConfig, LogonDetails, RunReport};
use callbridge_sim::{Identities, SimulatedService, Suite, PRIMARY, SECONDARY};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .init();

    let config = match &cli.config {
        Some(path) => HarnessConfig::load_from(path),
        None => HarnessConfig::load(),
    }
    .context("Failed to load harness configuration")?;

    match cli.command.as_ref().unwrap_or(&Commands::List) {
        Commands::List => list_suites()?,
        Commands::Run { suite } => {
            let suite = Suite::from_name(suite).with_context(|| {
                format!("Unknown suite: {}. Available: {}", suite, suite_names())
            })?;
            run_suites(&cli, &config, &[suite]).await?;
        }
        Commands::RunAll => run_suites(&cli, &config, &Suite::ALL).await?,
    }

    Ok(())
}

/// `RUST_LOG` when set, otherwise the callbridge crates at info (debug when verbose)
fn log_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "callbridge={0},callbridge_core={0},callbridge_sim={0}",
            level
        ))
    })
}

fn suite_names() -> String {
    Suite::ALL
        .iter()
        .map(Suite::name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_suites() -> Result<()> {
    println!("Available suites:");
    for suite in Suite::ALL {
        println!("  {:<12} {}", suite.name(), suite.description());
        println!("  {:<12} identities: {}", "", suite.identities().join(", "));
        for (position, procedure) in suite.procedures()?.iter().enumerate() {
            println!("  {:<12} {}. {}", "", position + 1, procedure);
        }
    }
    Ok(())
}

/// Configured credentials when both prefixes are set, built-in ones otherwise
fn load_identities() -> Result<Identities> {
    let primary = LogonDetails::from_env(PRIMARY);
    let secondary = LogonDetails::from_env(SECONDARY);

    match (primary, secondary) {
        (Ok(primary), Ok(secondary)) => {
            info!(
                "Using configured identities '{}' and '{}'",
                primary.username(),
                secondary.username()
            );
            Ok(Identities { primary, secondary })
        }
        (primary, secondary) => {
            for (prefix, result) in [(PRIMARY, primary), (SECONDARY, secondary)] {
                if let Err(e) = result {
                    info!("No usable {} identity ({}), using the built-in one", prefix, e);
                }
            }
            Identities::simulated().context("Failed to build the built-in identities")
        }
    }
}

async fn run_suites(cli: &Cli, config: &HarnessConfig, suites: &[Suite]) -> Result<()> {
    let identities = load_identities()?;
    let service = SimulatedService::new(cli.simulation());
    identities.register(&service);

    let mut failed = Vec::new();
    for suite in suites {
        match suite.run(&service, &identities, config).await {
            Ok(report) => {
                print_report(&report);
                if !report.is_success() {
                    failed.push(suite.name());
                }
            }
            Err(e) => {
                warn!("Suite '{}' could not run: {}", suite.name(), e);
                failed.push(suite.name());
            }
        }
    }

    let stats = service.stats();
    info!(
        "Service saw {} requests, {} lobbies created, {} sessions dropped",
        stats.requests, stats.lobbies_created, stats.sessions_dropped
    );

    if !failed.is_empty() {
        anyhow::bail!("Failed suites: {}", failed.join(", "));
    }
    info!("All suites passed");
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}:", report.group);
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(()) => println!("  ok    [{}] {} ({:?})", outcome.ordinal, outcome.name, outcome.elapsed),
            Err(e) => println!("  FAIL  [{}] {} ({:?}): {}", outcome.ordinal, outcome.name, outcome.elapsed, e),
        }
    }
    println!("  {} passed, {} failed", report.passed(), report.failed());
}
