//! Command-line interface definitions and parsing

use std::path::PathBuf;

use callbridge_sim::SimulationConfig;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "callbridge")]
#[command(about = "Run ordered lobby suites against the simulated service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to callbridge.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Simulated network conditions
    #[arg(long, value_enum, default_value_t = Network::Default)]
    pub network: Network,

    /// Seed for simulated latencies
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List the built-in suites and their procedures
    List,
    /// Run one suite by name
    Run {
        /// Name of the suite to run
        suite: String,
    },
    /// Run every suite in turn
    RunAll,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Ideal,
    Default,
    HighLatency,
    /// Default latency plus the peer-deletion race
    Racy,
}

impl Cli {
    pub fn simulation(&self) -> SimulationConfig {
        let config = match self.network {
            Network::Ideal => SimulationConfig::ideal(),
            Network::Default => SimulationConfig::default(),
            Network::HighLatency => SimulationConfig::high_latency(),
            Network::Racy => SimulationConfig::racy(),
        };
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}
