//! Rendering of the per-node configuration document.
//!
//! The document is plain `key: value` text, one entry per line. Mandatory keys
//! come first in a fixed order; `[settings]` from the cluster configuration
//! are appended after them, sorted by key. Validation keeps `[settings]` away
//! from the mandatory keys.

use crate::error::Result;
use cluster_types::{ClusterConfiguration, NodeConfiguration};

/// Render the configuration document for `node`.
///
/// Deterministic: the same inputs always produce the same text.
pub fn render_settings(cluster: &ClusterConfiguration, node: &NodeConfiguration) -> String {
    let shared = cluster.shared_dir();
    let mut entries: Vec<(String, String)> = vec![
        ("cluster.name".into(), cluster.name.clone()),
        ("node.name".into(), node.name()),
        ("pidfile".into(), node.pid_file.display().to_string()),
        ("http.port".into(), node.http_port.to_string()),
        ("transport.port".into(), node.transport_port.to_string()),
        ("discovery.seed_hosts".into(), cluster.seed_hosts()),
        ("path.shared_data".into(), shared.display().to_string()),
        ("path.repo".into(), shared.join("repo").display().to_string()),
        ("node.attr.testattr".into(), "test".into()),
    ];

    entries.extend(
        cluster
            .settings
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    let mut text = String::new();
    for (key, value) in entries {
        text.push_str(&key);
        text.push_str(": ");
        text.push_str(&value);
        text.push('\n');
    }
    text
}

/// Write the rendered document to `node.config_file`, replacing any existing
/// file, and create the shared directories it points at.
pub async fn write_settings(cluster: &ClusterConfiguration, node: &NodeConfiguration) -> Result<()> {
    if let Some(parent) = node.config_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::create_dir_all(cluster.shared_dir().join("repo")).await?;
    tokio::fs::write(&node.config_file, render_settings(cluster, node)).await?;
    tracing::debug!("{}: wrote {}", node.name(), node.config_file.display());
    Ok(())
}
