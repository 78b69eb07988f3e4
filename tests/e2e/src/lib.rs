//! # cluster-e2e
//!
//! End-to-end fixtures for testcluster.
//!
//! A [`Fixture`] packs the `fake-node` binary into a real `tar.gz`
//! distribution so that scenarios exercise the whole lifecycle: extraction,
//! configuration, daemonized start, readiness, diagnostics, and teardown.

#![warn(missing_docs)]
#![warn(clippy::all)]

use cluster_types::{ClusterConfiguration, DistributionConfig, DistributionKind};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

// =============================================================================
// Fixture
// =============================================================================

/// A temporary work area holding a distribution archive.
pub struct Fixture {
    dir: TempDir,
    archive: PathBuf,
}

impl Fixture {
    /// Build a distribution whose `bin/server` runs `fake_node`.
    pub fn new(fake_node: &Path) -> io::Result<Self> {
        let dir = TempDir::new()?;
        let src = dir.path().join("dist-src");
        let bin = src.join("server").join("bin");
        std::fs::create_dir_all(&bin)?;
        std::fs::create_dir_all(src.join("server").join("config"))?;

        let script = format!(
            "#!/bin/sh\n\
             home=\"$(cd \"$(dirname \"$0\")/..\" && pwd)\"\n\
             exec '{}' --home \"$home\" \"$@\"\n",
            fake_node.display()
        );
        let server = bin.join("server");
        std::fs::write(&server, script)?;
        make_executable(&server)?;

        let archive = dir.path().join("server.tar.gz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(&src)
            .arg("server")
            .status()?;
        if !status.success() {
            return Err(io::Error::other(format!("tar exited with {status}")));
        }

        Ok(Self { dir, archive })
    }

    /// Root of the temporary work area.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the distribution archive.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// A daemonized cluster configuration using this distribution.
    pub fn config(
        &self,
        name: &str,
        num_nodes: usize,
        base_http_port: u16,
        base_transport_port: u16,
    ) -> ClusterConfiguration {
        let mut distribution = DistributionConfig::new(DistributionKind::TarGz, &self.archive);
        distribution.identity = Some("fake-node".to_string());

        let mut config = ClusterConfiguration::new(distribution);
        config.name = name.to_string();
        config.num_nodes = num_nodes;
        config.base_http_port = base_http_port;
        config.base_transport_port = base_transport_port;
        config.work_dir = self.dir.path().join("work");
        config.wait.poll_interval_ms = 100;
        config.wait.timeout_secs = 20;
        config
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
