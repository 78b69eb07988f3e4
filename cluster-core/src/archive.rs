//! Distribution archive extraction.
//!
//! Unpacking is delegated to the platform tools (`tar`, `unzip`) through the
//! same command runner as setup commands, so failures carry the argument
//! vector, exit code, and tool output.

use crate::command::{run_ok, OutputMode};
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use cluster_types::{DistributionKind, NodeConfiguration};
use std::path::Path;

/// Unpacks a distribution archive into a node's base directory.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `node.base_dir`.
    async fn extract(&self, node: &NodeConfiguration, archive: &Path, mode: OutputMode)
        -> Result<()>;
}

/// `tar -xzf <archive> -C <dest>`
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzExtractor;

#[async_trait]
impl ArchiveExtractor for TarGzExtractor {
    async fn extract(
        &self,
        node: &NodeConfiguration,
        archive: &Path,
        mode: OutputMode,
    ) -> Result<()> {
        let argv = vec![
            "tar".to_string(),
            "-xzf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            node.base_dir.display().to_string(),
        ];
        run_ok(node, &argv, &node.base_dir, mode).await?;
        Ok(())
    }
}

/// `unzip -q -o <archive> -d <dest>`
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
    async fn extract(
        &self,
        node: &NodeConfiguration,
        archive: &Path,
        mode: OutputMode,
    ) -> Result<()> {
        let argv = vec![
            "unzip".to_string(),
            "-q".to_string(),
            "-o".to_string(),
            archive.display().to_string(),
            "-d".to_string(),
            node.base_dir.display().to_string(),
        ];
        run_ok(node, &argv, &node.base_dir, mode).await?;
        Ok(())
    }
}

/// Extractor for a distribution kind.
pub fn extractor_for(kind: DistributionKind) -> Box<dyn ArchiveExtractor> {
    match kind {
        DistributionKind::TarGz => Box::new(TarGzExtractor),
        DistributionKind::Zip => Box::new(ZipExtractor),
    }
}

/// Extract and check that the archive produced `node.home_dir`.
pub async fn extract_distribution(
    extractor: &dyn ArchiveExtractor,
    node: &NodeConfiguration,
    archive: &Path,
    mode: OutputMode,
) -> Result<()> {
    let archive = std::path::absolute(archive)?;
    if !archive.is_file() {
        return Err(ClusterError::Distribution {
            node: node.node_index,
            archive,
            expected: node.home_dir.clone(),
        });
    }

    tokio::fs::create_dir_all(&node.base_dir).await?;
    extractor.extract(node, &archive, mode).await?;

    if !node.home_dir.is_dir() {
        return Err(ClusterError::Distribution {
            node: node.node_index,
            archive,
            expected: node.home_dir.clone(),
        });
    }
    tracing::debug!(
        "{}: unpacked {} into {}",
        node.name(),
        archive.display(),
        node.home_dir.display()
    );
    Ok(())
}
