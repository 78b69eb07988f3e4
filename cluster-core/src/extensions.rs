//! Extension staging and installation.
//!
//! Staging copies each artifact into `<staging dir>/<extension name>/`; install
//! runs the distribution's plugin installer against the staged copy. The
//! install step holds a [`StagedArtifact`] handle and asks it for the staged
//! path only when it runs, so it never sees a location computed before the
//! copy happened.

use crate::command::{run_ok, OutputMode};
use crate::error::{ClusterError, Result};
use cluster_types::{ClusterConfiguration, NodeConfiguration};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// One extension artifact and, once staged, its location in the staging dir.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    name: String,
    source: PathBuf,
    staged: Arc<OnceLock<PathBuf>>,
}

impl StagedArtifact {
    /// Create an unstaged handle.
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            staged: Arc::new(OnceLock::new()),
        }
    }

    /// Extension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured artifact path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Final staged location.
    ///
    /// Fails with [`ClusterError::ArtifactNotStaged`] if staging has not run.
    pub fn path(&self) -> Result<PathBuf> {
        self.staged
            .get()
            .cloned()
            .ok_or_else(|| ClusterError::ArtifactNotStaged {
                name: self.name.clone(),
            })
    }
}

/// Fresh handles for every configured extension, sorted by name.
pub fn plan(cluster: &ClusterConfiguration) -> Vec<StagedArtifact> {
    cluster
        .extensions
        .iter()
        .map(|(name, source)| StagedArtifact::new(name.clone(), source.clone()))
        .collect()
}

/// Copy every artifact into its own directory under `node.plugins_staging_dir`.
///
/// An empty list is a no-op; the staging directory is not even created.
pub async fn stage(node: &NodeConfiguration, artifacts: &[StagedArtifact]) -> Result<()> {
    for artifact in artifacts {
        let artifact_error = |source| ClusterError::Artifact {
            name: artifact.name.clone(),
            path: artifact.source.clone(),
            source,
        };
        let file_name = artifact.source.file_name().ok_or_else(|| {
            artifact_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "artifact path has no file name",
            ))
        })?;
        let dir = node.plugins_staging_dir.join(&artifact.name);
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(file_name);
        tokio::fs::copy(&artifact.source, &target)
            .await
            .map_err(artifact_error)?;

        tracing::debug!("{}: staged extension '{}'", node.name(), artifact.name);
        // Re-staging into a fresh pipeline run yields the same location.
        let _ = artifact.staged.set(target);
    }
    Ok(())
}

/// Run the plugin installer for every staged artifact, from `node.home_dir`.
pub async fn install(
    node: &NodeConfiguration,
    installer: &[String],
    artifacts: &[StagedArtifact],
    mode: OutputMode,
) -> Result<()> {
    for artifact in artifacts {
        let staged = artifact.path()?;
        let mut argv = installer.to_vec();
        argv.push(format!("file:{}", staged.display()));

        tracing::info!("{}: installing extension '{}'", node.name(), artifact.name);
        run_ok(node, &argv, &node.home_dir, mode).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_types::{DistributionConfig, DistributionKind};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (ClusterConfiguration, NodeConfiguration) {
        let mut config = ClusterConfiguration::new(DistributionConfig::new(
            DistributionKind::TarGz,
            "server.tar.gz",
        ));
        config.work_dir = dir.path().join("work");
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        for name in ["zeta", "alpha"] {
            let path = artifacts.join(format!("{name}.zip"));
            std::fs::write(&path, name).unwrap();
            config.extensions.insert(name.into(), path);
        }
        let node = NodeConfiguration::new(&config, 0);
        std::fs::create_dir_all(&node.home_dir).unwrap();
        (config, node)
    }

    #[test]
    fn plan_is_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        let (config, _) = setup(&dir);
        let names: Vec<_> = plan(&config).iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn path_is_unavailable_before_staging() {
        let artifact = StagedArtifact::new("analysis", "/nowhere/analysis.zip");
        assert!(matches!(
            artifact.path(),
            Err(ClusterError::ArtifactNotStaged { .. })
        ));
    }

    #[tokio::test]
    async fn empty_stage_is_noop() {
        let dir = TempDir::new().unwrap();
        let (_, node) = setup(&dir);
        stage(&node, &[]).await.unwrap();
        assert!(!node.plugins_staging_dir.exists());
    }

    #[tokio::test]
    async fn stage_resolves_handles_shared_with_install() {
        let dir = TempDir::new().unwrap();
        let (config, node) = setup(&dir);
        let artifacts = plan(&config);
        let held_by_install = artifacts.clone();

        stage(&node, &artifacts).await.unwrap();

        let staged = held_by_install[0].path().unwrap();
        assert_eq!(staged, node.plugins_staging_dir.join("alpha").join("alpha.zip"));
        assert_eq!(std::fs::read_to_string(staged).unwrap(), "alpha");
    }

    #[tokio::test]
    async fn same_file_name_in_two_extensions_stays_apart() {
        let dir = TempDir::new().unwrap();
        let (_, node) = setup(&dir);
        let mut artifacts = Vec::new();
        for name in ["first", "second"] {
            let source = dir.path().join(name).join("plugin.zip");
            std::fs::create_dir_all(source.parent().unwrap()).unwrap();
            std::fs::write(&source, name).unwrap();
            artifacts.push(StagedArtifact::new(name, source));
        }

        stage(&node, &artifacts).await.unwrap();

        let first = artifacts[0].path().unwrap();
        let second = artifacts[1].path().unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(first).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(second).unwrap(), "second");
    }

    #[tokio::test]
    async fn missing_artifact_names_the_extension() {
        let dir = TempDir::new().unwrap();
        let (_, node) = setup(&dir);
        let artifacts = vec![StagedArtifact::new("ghost", dir.path().join("ghost.zip"))];

        let err = stage(&node, &artifacts).await.unwrap_err();
        assert!(matches!(err, ClusterError::Artifact { ref name, .. } if name == "ghost"));
    }

    #[tokio::test]
    async fn install_before_stage_fails() {
        let dir = TempDir::new().unwrap();
        let (config, node) = setup(&dir);
        let installer = vec!["true".to_string()];

        let err = install(&node, &installer, &plan(&config), OutputMode::Buffered)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ArtifactNotStaged { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_passes_staged_location_to_installer() {
        let dir = TempDir::new().unwrap();
        let (config, node) = setup(&dir);
        let artifacts = plan(&config);
        stage(&node, &artifacts).await.unwrap();

        let record = dir.path().join("installed.txt");
        let installer = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo \"$0\" >> {}", record.display()),
        ];
        install(&node, &installer, &artifacts, OutputMode::Buffered)
            .await
            .unwrap();

        let installed = std::fs::read_to_string(record).unwrap();
        let lines: Vec<_> = installed.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("file:{}", node.plugins_staging_dir.join("alpha/alpha.zip").display()),
                format!("file:{}", node.plugins_staging_dir.join("zeta/zeta.zip").display()),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_install_reports_argv() {
        let dir = TempDir::new().unwrap();
        let (config, node) = setup(&dir);
        let artifacts = plan(&config);
        stage(&node, &artifacts).await.unwrap();

        let installer = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let err = install(&node, &installer, &artifacts, OutputMode::Buffered)
            .await
            .unwrap_err();
        match err {
            ClusterError::CommandFailed { argv, exit_code, .. } => {
                assert_eq!(exit_code, Some(3));
                assert!(argv.last().unwrap().starts_with("file:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
