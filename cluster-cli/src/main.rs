//! # testcluster
//!
//! Start, inspect, and tear down ephemeral multi-node test clusters.
//!
//! ## Commands
//!
//! - `up`: Set up and start every node, wait until all are ready
//! - `down`: Stop every node recorded in a pid file
//! - `status`: Show pid, process, and probe state per node
//!
//! ## Example
//!
//! ```bash
//! # Start a cluster, run the test suite against it, always tear down
//! testcluster up -c cluster.toml -- cargo test --test integration
//!
//! # Start a daemonized cluster and leave it running
//! testcluster up -c cluster.toml
//! testcluster status -c cluster.toml
//! testcluster down -c cluster.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{down, status, up};

/// Start, inspect, and tear down ephemeral multi-node test clusters.
#[derive(Parser, Debug)]
#[command(name = "testcluster")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Cluster configuration file
    #[arg(long, short, global = true, default_value = "cluster.toml")]
    config: PathBuf,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up and start the cluster, then wait until every node is ready
    Up {
        /// Stream setup output live instead of buffering it
        #[arg(long)]
        debug: bool,

        /// Workload to run against the ready cluster; the cluster is torn
        /// down afterwards and its exit status becomes ours
        #[arg(last = true)]
        workload: Vec<String>,
    },

    /// Stop every node recorded in a pid file
    Down,

    /// Show per-node status
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Up { debug, workload } => {
            let code = up::run(&cli.config, debug, &workload).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Down => {
            down::run(&cli.config).await?;
        }
        Commands::Status { json } => {
            status::run(&cli.config, json).await?;
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
