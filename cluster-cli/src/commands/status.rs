//! Show cluster status.

use anyhow::Result;
use cluster_core::{Cluster, NodeStatus};
use serde::Serialize;
use std::path::Path;

use crate::config;

/// JSON shape of one node's status.
#[derive(Debug, Serialize)]
struct NodeStatusJson {
    node: String,
    http_port: u16,
    transport_port: u16,
    pid: Option<u32>,
    process_alive: bool,
    responding: bool,
}

impl From<&NodeStatus> for NodeStatusJson {
    fn from(status: &NodeStatus) -> Self {
        Self {
            node: format!("node{}", status.node_index),
            http_port: status.http_port,
            transport_port: status.transport_port,
            pid: status.pid,
            process_alive: status.process_alive,
            responding: status.responding,
        }
    }
}

/// Run the status command.
pub async fn run(config_path: &Path, json: bool) -> Result<()> {
    let config = config::load(config_path)?;
    let name = config.name.clone();
    let cluster = Cluster::new(config)?;
    let statuses = cluster.status().await?;

    if json {
        let rows: Vec<NodeStatusJson> = statuses.iter().map(NodeStatusJson::from).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "cluster": name,
                "nodes": rows,
            }))?
        );
        return Ok(());
    }

    println!("=== cluster '{}' ===", name);
    println!();
    for status in &statuses {
        println!("{}", format_row(status));
    }
    Ok(())
}

fn format_row(status: &NodeStatus) -> String {
    let pid = status
        .pid
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "-".to_string());
    let process = if status.process_alive {
        "running"
    } else {
        "stopped"
    };
    let http = if status.responding {
        "responding"
    } else {
        "not responding"
    };
    format!(
        "node{}  http={}  transport={}  pid={}  {}  {}",
        status.node_index, status.http_port, status.transport_port, pid, process, http
    )
}
