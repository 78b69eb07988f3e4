//! Start a cluster and optionally run a workload against it.

use anyhow::{Context, Result};
use cluster_core::{Cluster, RunningCluster};
use std::path::Path;

use crate::config;

/// Environment variable carrying every node's HTTP port, comma-joined.
pub const HTTP_PORTS_ENV: &str = "TESTCLUSTER_HTTP_PORTS";
/// Environment variable carrying every node's transport port, comma-joined.
pub const TRANSPORT_PORTS_ENV: &str = "TESTCLUSTER_TRANSPORT_PORTS";

/// Run the up command. Returns the process exit code.
pub async fn run(config_path: &Path, debug: bool, workload: &[String]) -> Result<i32> {
    let mut config = config::load(config_path)?;
    config.debug |= debug;
    let daemonize = config.daemonize;

    let cluster = Cluster::new(config)?;
    let mut running = cluster.start().await?;

    println!("Cluster '{}' is up:", running.name());
    for node in running.nodes() {
        println!(
            "  {}  http={}  transport={}",
            node.name(),
            node.http_port,
            node.transport_port
        );
    }

    if !workload.is_empty() {
        let code = run_workload(&running, workload).await;
        running.stop().await?;
        return code;
    }

    if daemonize {
        running.detach();
        println!();
        println!("Stop it with 'testcluster down'.");
        return Ok(0);
    }

    println!("Running in foreground, press Ctrl+C to stop.");
    tokio::select! {
        result = running.wait_foreground() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }
    running.stop().await?;
    Ok(0)
}

/// Run the workload with the cluster's ports in its environment.
async fn run_workload(running: &RunningCluster, workload: &[String]) -> Result<i32> {
    let (program, args) = workload
        .split_first()
        .context("Workload command is empty")?;

    tracing::info!("running workload {:?}", workload);
    let status = tokio::process::Command::new(program)
        .args(args)
        .env(HTTP_PORTS_ENV, join_ports(&running.http_ports()))
        .env(TRANSPORT_PORTS_ENV, join_ports(&running.transport_ports()))
        .status()
        .await
        .with_context(|| format!("Failed to run workload '{}'", program))?;

    // Killed by a signal counts as failure.
    Ok(status.code().unwrap_or(1))
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
