//! Cluster start diagnostics.
//!
//! When the readiness barrier fails, every node is reported: its start
//! command and environment for reproduction, buffered output, the tail of the
//! startup log, and the state the barrier last saw. Per-node sections are
//! logged first, then a single aggregate error is raised.

use cluster_types::NodeConfiguration;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the barrier last observed for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Pid file present and probe answered.
    Ready,
    /// Still coming up.
    Starting,
    /// The start wrapper wrote the failure marker.
    FailureMarker,
    /// The foreground process exited.
    Exited(Option<i32>),
    /// The setup pipeline failed before start.
    SetupFailed(String),
}

impl NodeState {
    /// Returns true for states that fail the cluster immediately.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            NodeState::FailureMarker | NodeState::Exited(_) | NodeState::SetupFailed(_)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Ready => write!(f, "ready"),
            NodeState::Starting => write!(f, "not ready"),
            NodeState::FailureMarker => write!(f, "failed (failure marker present)"),
            NodeState::Exited(Some(code)) => write!(f, "exited with code {code}"),
            NodeState::Exited(None) => write!(f, "exited (terminated by signal)"),
            NodeState::SetupFailed(err) => write!(f, "setup failed: {err}"),
        }
    }
}

/// Why the cluster failed to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The deadline elapsed before every node was ready.
    TimedOut(Duration),
    /// These nodes failed.
    NodesFailed(Vec<usize>),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::TimedOut(after) => {
                write!(f, "timed out after {}s waiting for nodes", after.as_secs_f64())
            }
            FailureCause::NodesFailed(nodes) => {
                let names: Vec<String> = nodes.iter().map(|i| format!("node{i}")).collect();
                write!(f, "{} failed to start", names.join(", "))
            }
        }
    }
}

/// Diagnostics for one node.
#[derive(Debug, Clone)]
pub struct NodeReport {
    /// Node index.
    pub node_index: usize,
    /// Start command (executable and arguments).
    pub command: Vec<String>,
    /// Environment given to the node's processes.
    pub env: BTreeMap<String, String>,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Buffered output (empty when streamed live).
    pub output: String,
    /// Last lines of the startup log, if it exists.
    pub log_tail: Option<String>,
    /// State the barrier last saw.
    pub state: NodeState,
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "|---- node{}: {}", self.node_index, self.state)?;
        writeln!(f, "|  command: {}", self.command.join(" "))?;
        writeln!(f, "|  working dir: {}", self.working_dir.display())?;
        if self.env.is_empty() {
            writeln!(f, "|  env: (none)")?;
        } else {
            writeln!(f, "|  env:")?;
            for (key, value) in &self.env {
                writeln!(f, "|    {key}={value}")?;
            }
        }
        if !self.output.trim().is_empty() {
            writeln!(f, "|  output:")?;
            for line in self.output.lines() {
                writeln!(f, "|    {line}")?;
            }
        }
        if let Some(tail) = &self.log_tail {
            writeln!(f, "|  startup log (tail):")?;
            for line in tail.lines() {
                writeln!(f, "|    {line}")?;
            }
        }
        write!(f, "|----")
    }
}

/// Aggregate start failure for a whole cluster.
#[derive(Debug, Clone)]
pub struct ClusterReport {
    /// Cluster identifier.
    pub cluster_name: String,
    /// Failure cause.
    pub cause: FailureCause,
    /// One entry per node, in index order.
    pub nodes: Vec<NodeReport>,
}

impl ClusterReport {
    /// Build a report from the nodes and the states the barrier last saw.
    pub fn collect(
        cluster_name: &str,
        cause: FailureCause,
        nodes: &[NodeConfiguration],
        states: &[NodeState],
        log_tail_lines: usize,
    ) -> Self {
        let nodes = nodes
            .iter()
            .zip(states)
            .map(|(node, state)| NodeReport {
                node_index: node.node_index,
                command: node.command_line(),
                env: node.env.clone(),
                working_dir: node.working_dir.clone(),
                output: node.output.contents(),
                log_tail: tail_lines(&node.startup_log, log_tail_lines),
                state: state.clone(),
            })
            .collect();
        Self {
            cluster_name: cluster_name.to_string(),
            cause,
            nodes,
        }
    }

    /// Log every node section, then the aggregate summary.
    pub fn emit(&self) {
        for node in &self.nodes {
            tracing::error!("{}: start diagnostics\n{}", self.cluster_name, node);
        }
        tracing::error!("cluster '{}': {}", self.cluster_name, self.cause);
    }
}

impl fmt::Display for ClusterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster '{}': {}", self.cluster_name, self.cause)?;
        for node in &self.nodes {
            write!(f, "\n{node}")?;
        }
        Ok(())
    }
}

/// Last `n` lines of a text file, or `None` if it cannot be read.
pub fn tail_lines(path: &Path, n: usize) -> Option<String> {
    let content = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&content);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    Some(lines[start..].join("\n"))
}
