//! Configuration loading for the CLI.
//!
//! The library accepts a configuration without a `name` and generates one.
//! The CLI cannot: `down` and `status` run in a later process and must find
//! the same directories `up` created.

use anyhow::{bail, Context, Result};
use cluster_types::ClusterConfiguration;
use std::path::Path;

/// Load, validate, and check that the cluster is explicitly named.
pub fn load(path: &Path) -> Result<ClusterConfiguration> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if !table.contains_key("name") {
        bail!(
            "{}: 'name' is required so that later commands find the same cluster",
            path.display()
        );
    }

    ClusterConfiguration::from_file(path)
        .with_context(|| format!("Invalid cluster configuration {}", path.display()))
}
