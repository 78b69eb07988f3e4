//! Cluster lifecycle: setup, start, readiness, teardown.

use crate::archive::{extractor_for, ArchiveExtractor};
use crate::barrier::{ReadinessBarrier, Verdict};
use crate::capture::scoped;
use crate::diagnostics::{ClusterReport, FailureCause};
use crate::error::{ClusterError, Result};
use crate::guard::{self, PidFile};
use crate::identity::{is_server, ProcessTable, SysinfoProcessTable};
use crate::pipeline::SetupPipeline;
use crate::probe::{HttpProbe, ReadinessProbe};
use crate::supervisor::{Launch, StartedNode};
use cluster_types::{ClusterConfiguration, NodeConfiguration};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;

/// An orchestrator for one test cluster.
///
/// # Example
///
/// ```no_run
/// use testcluster_core::Cluster;
/// use cluster_types::ClusterConfiguration;
///
/// # async fn example() -> testcluster_core::Result<()> {
/// let config = ClusterConfiguration::from_file("cluster.toml".as_ref())?;
/// let cluster = Cluster::new(config)?;
/// cluster
///     .run_with(|nodes| async move {
///         for node in &nodes {
///             println!("{} on {}", node.name(), node.http_url());
///         }
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Cluster {
    config: Arc<ClusterConfiguration>,
    processes: Arc<dyn ProcessTable>,
    probe: Arc<dyn ReadinessProbe>,
    extractor: Arc<dyn ArchiveExtractor>,
}

/// Live state of one node, as reported by [`Cluster::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node index.
    pub node_index: usize,
    /// HTTP port.
    pub http_port: u16,
    /// Transport port.
    pub transport_port: u16,
    /// Pid recorded in the pid file.
    pub pid: Option<u32>,
    /// Recorded pid is alive and carries the server identity.
    pub process_alive: bool,
    /// Readiness probe answered.
    pub responding: bool,
}

impl Cluster {
    /// Create an orchestrator with the default process table, HTTP probe,
    /// and archive extractor for the configured distribution kind.
    pub fn new(config: ClusterConfiguration) -> Result<Self> {
        config.validate()?;
        let probe = HttpProbe::new(config.wait.probe_timeout())?;
        let extractor: Arc<dyn ArchiveExtractor> =
            Arc::from(extractor_for(config.distribution.kind));
        Ok(Self {
            config: Arc::new(config),
            processes: Arc::new(SysinfoProcessTable),
            probe: Arc::new(probe),
            extractor,
        })
    }

    /// Replace the process table.
    pub fn with_process_table(mut self, processes: Arc<dyn ProcessTable>) -> Self {
        self.processes = processes;
        self
    }

    /// Replace the readiness probe.
    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the archive extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Cluster configuration.
    pub fn config(&self) -> &ClusterConfiguration {
        &self.config
    }

    /// Per-node configuration, in index order.
    pub fn nodes(&self) -> Vec<NodeConfiguration> {
        self.config.nodes()
    }

    /// Set up and start every node, then wait until all are ready.
    ///
    /// Pipelines run concurrently, one per node. A node whose pipeline fails
    /// is reported as failed by the barrier; siblings are not cancelled. On
    /// failure the per-node diagnostics are logged, started nodes are stopped,
    /// and [`ClusterError::StartupFailed`] is returned.
    pub async fn start(&self) -> Result<RunningCluster> {
        let nodes = self.nodes();
        tracing::info!(
            "starting cluster '{}' with {} node(s) in {}",
            self.config.name,
            nodes.len(),
            self.config.cluster_dir().display()
        );

        let pipeline = SetupPipeline::new(
            self.config.clone(),
            self.processes.clone(),
            self.extractor.clone(),
        );
        let debug = self.config.debug;
        let launches = join_all(nodes.iter().map(|node| {
            let capture = (!debug).then(|| node.output.clone());
            scoped(pipeline.run(node), capture)
        }))
        .await;

        let mut started: Vec<StartedNode> = nodes
            .into_iter()
            .zip(launches)
            .map(|(config, launch)| StartedNode {
                config,
                launch: launch.unwrap_or_else(Launch::NotStarted),
            })
            .collect();

        let barrier = ReadinessBarrier::new(self.probe.clone(), &self.config.wait);
        let outcome = barrier.wait(&mut started).await;

        let cause = match outcome.verdict {
            Verdict::Ready => {
                tracing::info!(
                    "cluster '{}' is ready after {:?}",
                    self.config.name,
                    outcome.elapsed
                );
                return Ok(RunningCluster::new(
                    self.config.clone(),
                    self.processes.clone(),
                    started,
                ));
            }
            Verdict::Failed(failed) => FailureCause::NodesFailed(failed),
            Verdict::TimedOut => FailureCause::TimedOut(self.config.wait.timeout()),
        };

        let configs: Vec<NodeConfiguration> = started.iter().map(|n| n.config.clone()).collect();
        let report = ClusterReport::collect(
            &self.config.name,
            cause,
            &configs,
            &outcome.states,
            self.config.wait.log_tail_lines,
        );
        report.emit();

        // A node that never launched may have a pid file owned by someone else.
        let launched = started
            .into_iter()
            .filter(|node| node.launch.is_started())
            .collect();
        let mut running =
            RunningCluster::new(self.config.clone(), self.processes.clone(), launched);
        if let Err(e) = running.stop().await {
            tracing::warn!("cleanup after failed start: {}", e);
        }
        Err(ClusterError::StartupFailed(Box::new(report)))
    }

    /// Start the cluster, run `workload`, and always tear down afterwards.
    ///
    /// The workload's output is returned if teardown succeeds; a teardown
    /// failure is returned otherwise.
    pub async fn run_with<W, Fut, T>(&self, workload: W) -> Result<T>
    where
        W: FnOnce(Vec<NodeConfiguration>) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut running = self.start().await?;
        let output = workload(running.nodes()).await;
        running.stop().await?;
        Ok(output)
    }

    /// Stop every node recorded in a pid file.
    ///
    /// Used when the orchestrator that started the cluster is gone. Every node
    /// is attempted even if some fail.
    pub async fn stop_from_pid_files(&self) -> Result<()> {
        let nodes = self.nodes();
        stop_all(nodes.iter().rev(), self.processes.as_ref())
    }

    /// Report pid file, process, and probe state for every node.
    pub async fn status(&self) -> Result<Vec<NodeStatus>> {
        let marker = self.config.distribution.identity();
        let nodes = self.nodes();
        let mut statuses = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let pid = match guard::read_pid_file(&node.pid_file)? {
                PidFile::Pid(pid) => Some(pid),
                PidFile::Absent | PidFile::Garbage(_) => None,
            };
            let process_alive = match pid {
                Some(pid) => self
                    .processes
                    .identity_of(pid)?
                    .is_some_and(|identity| is_server(&identity, &marker)),
                None => false,
            };
            statuses.push(NodeStatus {
                node_index: node.node_index,
                http_port: node.http_port,
                transport_port: node.transport_port,
                pid,
                process_alive,
                responding: self.probe.probe(node).await,
            });
        }
        Ok(statuses)
    }
}

/// A started, ready cluster.
///
/// Call [`stop`](Self::stop) when done. If it is dropped without being
/// stopped, every node is still stopped (best effort) by pid file.
pub struct RunningCluster {
    config: Arc<ClusterConfiguration>,
    processes: Arc<dyn ProcessTable>,
    nodes: Vec<StartedNode>,
    stopped: bool,
}

impl RunningCluster {
    fn new(
        config: Arc<ClusterConfiguration>,
        processes: Arc<dyn ProcessTable>,
        nodes: Vec<StartedNode>,
    ) -> Self {
        Self {
            config,
            processes,
            nodes,
            stopped: false,
        }
    }

    /// Cluster name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Per-node configuration, in index order.
    pub fn nodes(&self) -> Vec<NodeConfiguration> {
        self.nodes.iter().map(|n| n.config.clone()).collect()
    }

    /// HTTP port of every node, in index order.
    pub fn http_ports(&self) -> Vec<u16> {
        self.nodes.iter().map(|n| n.config.http_port).collect()
    }

    /// Transport port of every node, in index order.
    pub fn transport_ports(&self) -> Vec<u16> {
        self.nodes.iter().map(|n| n.config.transport_port).collect()
    }

    /// Returns true if the nodes run as children of this process.
    pub fn is_foreground(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.launch, Launch::Attached(_)))
    }

    /// Wait until every foreground node has exited.
    ///
    /// Returns immediately for daemonized clusters.
    pub async fn wait_foreground(&mut self) -> Result<()> {
        for node in &mut self.nodes {
            if let Launch::Attached(child) = &mut node.launch {
                let status = child.wait().await?;
                tracing::info!("{}: exited with {}", node.config.name(), status);
            }
        }
        Ok(())
    }

    /// Release the cluster without stopping it.
    ///
    /// Daemonized nodes keep running and can be stopped later with
    /// [`Cluster::stop_from_pid_files`]. Foreground nodes are children of this
    /// process and are killed when it drops them.
    pub fn detach(mut self) -> Vec<NodeConfiguration> {
        self.stopped = true;
        self.nodes()
    }

    /// Stop every node in reverse index order.
    ///
    /// Foreground children are killed directly; every node is then stopped by
    /// pid file, and a daemonized node's wrapper process group is killed if it
    /// is still running. A node that cannot be stopped does not prevent the
    /// others from being stopped; all failures are returned together.
    pub async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        tracing::info!("stopping cluster '{}'", self.config.name);

        for node in self.nodes.iter_mut().rev() {
            if let Launch::Attached(child) = &mut node.launch {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("{}: child already gone: {}", node.config.name(), e);
                }
                let _ = child.wait().await;
            }
        }

        stop_started(&self.nodes, self.processes.as_ref())
    }
}

impl Drop for RunningCluster {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        tracing::warn!(
            "cluster '{}' dropped without stop(), stopping by pid file",
            self.config.name
        );
        for node in self.nodes.iter_mut().rev() {
            if let Launch::Attached(child) = &mut node.launch {
                let _ = child.start_kill();
            }
        }
        if let Err(e) = stop_started(&self.nodes, self.processes.as_ref()) {
            tracing::warn!("{}", e);
        }
    }
}

/// Stop each node by pid file, collecting failures instead of stopping early.
fn stop_all<'a>(
    nodes: impl Iterator<Item = &'a NodeConfiguration>,
    processes: &dyn ProcessTable,
) -> Result<()> {
    let mut failures = Vec::new();
    for node in nodes {
        stop_by_pid_file(node, processes, &mut failures);
    }
    teardown_result(failures)
}

/// Stop started nodes in reverse index order: pid file first, then whatever
/// is left in a daemonized node's wrapper process group.
fn stop_started(nodes: &[StartedNode], processes: &dyn ProcessTable) -> Result<()> {
    let mut failures = Vec::new();
    for node in nodes.iter().rev() {
        stop_by_pid_file(&node.config, processes, &mut failures);
        if let Launch::Detached(group) = &node.launch {
            match group.kill() {
                Ok(true) => tracing::debug!(
                    "{}: killed wrapper process group {:?}",
                    node.config.name(),
                    group.pgid()
                ),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("{}: stop failed: {}", node.config.name(), e);
                    failures.push((node.config.node_index, e.to_string()));
                }
            }
        }
    }
    teardown_result(failures)
}

fn stop_by_pid_file(
    node: &NodeConfiguration,
    processes: &dyn ProcessTable,
    failures: &mut Vec<(usize, String)>,
) {
    match guard::stop_node(node, processes) {
        Ok(outcome) => tracing::debug!("{}: {:?}", node.name(), outcome),
        Err(e) => {
            tracing::warn!("{}: stop failed: {}", node.name(), e);
            failures.push((node.node_index, e.to_string()));
        }
    }
}

fn teardown_result(mut failures: Vec<(usize, String)>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        failures.sort_by_key(|(index, _)| *index);
        Err(ClusterError::Teardown { failures })
    }
}
