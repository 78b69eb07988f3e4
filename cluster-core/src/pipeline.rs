//! Per-node setup pipeline.
//!
//! Stages run strictly in order for one node; pipelines for different nodes
//! are independent. A failing stage aborts the rest of that node's pipeline
//! only, and the error is tagged with the stage it came from.

use crate::archive::{extract_distribution, ArchiveExtractor};
use crate::command::{run_ok, OutputMode};
use crate::error::{ClusterError, Result};
use crate::extensions::{self, StagedArtifact};
use crate::guard;
use crate::identity::ProcessTable;
use crate::settings::write_settings;
use crate::supervisor::{self, Launch};
use cluster_types::{ClusterConfiguration, NodeConfiguration};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// A setup pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Wipe and recreate the node's directories.
    Clean,
    /// Refuse to start over a live previous instance.
    CheckPrevious,
    /// Kill a leftover instance recorded in the pid file.
    StopPrevious,
    /// Unpack the distribution.
    Extract,
    /// Render the configuration document.
    Configure,
    /// Copy extension artifacts into the staging directory.
    StageExtensions,
    /// Install staged extensions.
    InstallExtensions,
    /// Run setup commands.
    SetupCommands,
    /// Launch the server.
    Start,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 9] = [
        Stage::Clean,
        Stage::CheckPrevious,
        Stage::StopPrevious,
        Stage::Extract,
        Stage::Configure,
        Stage::StageExtensions,
        Stage::InstallExtensions,
        Stage::SetupCommands,
        Stage::Start,
    ];

    /// Stage name as it appears in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::CheckPrevious => "check-previous",
            Stage::StopPrevious => "stop-previous",
            Stage::Extract => "extract",
            Stage::Configure => "configure",
            Stage::StageExtensions => "stage-extensions",
            Stage::InstallExtensions => "install-extensions",
            Stage::SetupCommands => "setup-commands",
            Stage::Start => "start",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the setup stages for individual nodes of one cluster.
#[derive(Clone)]
pub struct SetupPipeline {
    cluster: Arc<ClusterConfiguration>,
    processes: Arc<dyn ProcessTable>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl SetupPipeline {
    /// Create a pipeline.
    pub fn new(
        cluster: Arc<ClusterConfiguration>,
        processes: Arc<dyn ProcessTable>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            cluster,
            processes,
            extractor,
        }
    }

    fn mode(&self) -> OutputMode {
        OutputMode::for_debug(self.cluster.debug)
    }

    /// Run every stage except start.
    pub async fn prepare(&self, node: &NodeConfiguration) -> Result<()> {
        let marker = self.cluster.distribution.identity();
        let artifacts = extensions::plan(&self.cluster);

        self.stage(node, Stage::Clean, clean(node)).await?;
        self.stage(node, Stage::CheckPrevious, async {
            guard::check_previous(node, self.processes.as_ref(), &marker)
        })
        .await?;
        self.stage(node, Stage::StopPrevious, async {
            guard::stop_previous(node, self.processes.as_ref(), &marker)
        })
        .await?;
        self.stage(
            node,
            Stage::Extract,
            extract_distribution(
                self.extractor.as_ref(),
                node,
                &self.cluster.distribution.archive,
                self.mode(),
            ),
        )
        .await?;
        self.stage(node, Stage::Configure, write_settings(&self.cluster, node))
            .await?;
        self.stage(
            node,
            Stage::StageExtensions,
            extensions::stage(node, &artifacts),
        )
        .await?;
        self.stage(
            node,
            Stage::InstallExtensions,
            self.install_extensions(node, &artifacts),
        )
        .await?;
        self.stage(node, Stage::SetupCommands, self.setup_commands(node))
            .await?;
        Ok(())
    }

    /// Run the full pipeline, ending with the start stage.
    pub async fn run(&self, node: &NodeConfiguration) -> Result<Launch> {
        self.prepare(node).await?;
        self.stage(
            node,
            Stage::Start,
            supervisor::start(node, self.cluster.daemonize),
        )
        .await
    }

    async fn stage<T, F>(&self, node: &NodeConfiguration, stage: Stage, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tracing::debug!("{}: {}", node.name(), stage);
        fut.await.map_err(|e| {
            tracing::error!("{}: {} failed: {}", node.name(), stage, e);
            e.in_stage(node.node_index, stage)
        })
    }

    async fn install_extensions(
        &self,
        node: &NodeConfiguration,
        artifacts: &[StagedArtifact],
    ) -> Result<()> {
        extensions::install(
            node,
            &self.cluster.distribution.plugin_installer,
            artifacts,
            self.mode(),
        )
        .await
    }

    async fn setup_commands(&self, node: &NodeConfiguration) -> Result<()> {
        for command in &self.cluster.setup_commands {
            tracing::info!("{}: running setup command '{}'", node.name(), command.name);
            run_ok(node, &command.command, &node.working_dir, self.mode()).await?;
        }
        Ok(())
    }
}

/// Delete the home, working, and staging directories; recreate the working
/// directory. The pid file is left alone for the guard stages.
async fn clean(node: &NodeConfiguration) -> Result<()> {
    for dir in [&node.home_dir, &node.working_dir, &node.plugins_staging_dir] {
        remove_dir_if_present(dir).await?;
    }
    tokio::fs::create_dir_all(&node.working_dir).await?;
    Ok(())
}

async fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClusterError::Io(e)),
    }
}
