//! Stop a cluster by its pid files.

use anyhow::Result;
use cluster_core::Cluster;
use std::path::Path;

use crate::config;

/// Run the down command.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = config::load(config_path)?;
    let name = config.name.clone();
    let cluster = Cluster::new(config)?;

    cluster.stop_from_pid_files().await?;
    println!("Cluster '{}' is down.", name);
    Ok(())
}
