//! Readiness barrier.
//!
//! Polls every node at a fixed interval until all are ready, any has failed,
//! or the deadline elapses. Failure signals are checked before probing, so a
//! failed node resolves the barrier on the next tick even if its siblings are
//! healthy.

use crate::diagnostics::NodeState;
use crate::probe::ReadinessProbe;
use crate::supervisor::{Launch, StartedNode};
use cluster_types::WaitConfig;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// How the barrier resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every node is ready.
    Ready,
    /// These nodes failed.
    Failed(Vec<usize>),
    /// The deadline elapsed first.
    TimedOut,
}

/// Barrier result with the last observed state of every node.
#[derive(Debug, Clone)]
pub struct BarrierOutcome {
    /// How the barrier resolved.
    pub verdict: Verdict,
    /// Last observed state, indexed like the input nodes.
    pub states: Vec<NodeState>,
    /// Time spent waiting.
    pub elapsed: Duration,
}

/// Joins all nodes of a cluster on readiness.
pub struct ReadinessBarrier {
    probe: Arc<dyn ReadinessProbe>,
    interval: Duration,
    timeout: Duration,
}

impl ReadinessBarrier {
    /// Create a barrier with the timing from `wait`.
    pub fn new(probe: Arc<dyn ReadinessProbe>, wait: &WaitConfig) -> Self {
        Self {
            probe,
            interval: wait.poll_interval(),
            timeout: wait.timeout(),
        }
    }

    /// Wait for `nodes`.
    pub async fn wait(&self, nodes: &mut [StartedNode]) -> BarrierOutcome {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut states = vec![NodeState::Starting; nodes.len()];

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            for (state, node) in states.iter_mut().zip(nodes.iter_mut()) {
                if let Some(failed) = failure_signal(node) {
                    *state = failed;
                }
            }
            let failed: Vec<usize> = nodes
                .iter()
                .zip(&states)
                .filter(|(_, state)| state.is_failed())
                .map(|(node, _)| node.config.node_index)
                .collect();
            if !failed.is_empty() {
                tracing::debug!("barrier: failed nodes {:?}", failed);
                return BarrierOutcome {
                    verdict: Verdict::Failed(failed),
                    states,
                    elapsed: start.elapsed(),
                };
            }

            let ready = join_all(nodes.iter().map(|node| async move {
                node.config.pid_file.exists() && self.probe.probe(&node.config).await
            }))
            .await;
            for (state, ready) in states.iter_mut().zip(&ready) {
                *state = if *ready {
                    NodeState::Ready
                } else {
                    NodeState::Starting
                };
            }
            if ready.iter().all(|ready| *ready) {
                tracing::info!("all {} nodes ready after {:?}", nodes.len(), start.elapsed());
                return BarrierOutcome {
                    verdict: Verdict::Ready,
                    states,
                    elapsed: start.elapsed(),
                };
            }

            if Instant::now() >= deadline {
                return BarrierOutcome {
                    verdict: Verdict::TimedOut,
                    states,
                    elapsed: start.elapsed(),
                };
            }
        }
    }
}

/// A failure signal for `node`, if it has one.
fn failure_signal(node: &mut StartedNode) -> Option<NodeState> {
    match &mut node.launch {
        Launch::NotStarted(err) => Some(NodeState::SetupFailed(err.to_string())),
        _ if node.config.failure_marker.exists() => Some(NodeState::FailureMarker),
        Launch::Attached(child) => match child.try_wait() {
            Ok(Some(status)) => Some(NodeState::Exited(status.code())),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("{}: cannot poll child: {}", node.config.name(), e);
                None
            }
        },
        Launch::Detached(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::supervisor::DaemonGroup;
    use async_trait::async_trait;
    use cluster_types::{
        ClusterConfiguration, DistributionConfig, DistributionKind, NodeConfiguration,
    };
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Probe that answers for a configurable set of node indices.
    #[derive(Default)]
    struct SetProbe {
        ready: Mutex<HashSet<usize>>,
    }

    impl SetProbe {
        fn mark_ready(&self, index: usize) {
            self.ready.lock().unwrap().insert(index);
        }
    }

    #[async_trait]
    impl ReadinessProbe for SetProbe {
        async fn probe(&self, node: &NodeConfiguration) -> bool {
            self.ready.lock().unwrap().contains(&node.node_index)
        }
    }

    fn wait_config(interval_ms: u64, timeout_secs: u64) -> WaitConfig {
        WaitConfig {
            poll_interval_ms: interval_ms,
            timeout_secs,
            ..WaitConfig::default()
        }
    }

    fn started(dir: &TempDir, n: usize) -> Vec<StartedNode> {
        let mut config = ClusterConfiguration::new(DistributionConfig::new(
            DistributionKind::TarGz,
            "server.tar.gz",
        ));
        config.num_nodes = n;
        config.work_dir = dir.path().to_path_buf();
        config
            .nodes()
            .into_iter()
            .map(|node| {
                std::fs::create_dir_all(&node.working_dir).unwrap();
                StartedNode {
                    config: node,
                    launch: Launch::Detached(DaemonGroup::default()),
                }
            })
            .collect()
    }

    fn write_pid(node: &StartedNode) {
        std::fs::write(&node.config.pid_file, "1").unwrap();
    }

    #[tokio::test]
    async fn all_ready_resolves_before_deadline() {
        let dir = TempDir::new().unwrap();
        let mut nodes = started(&dir, 2);
        let probe = Arc::new(SetProbe::default());
        for node in &nodes {
            write_pid(node);
            probe.mark_ready(node.config.node_index);
        }

        let barrier = ReadinessBarrier::new(probe, &wait_config(50, 30));
        let outcome = barrier.wait(&mut nodes).await;

        assert_eq!(outcome.verdict, Verdict::Ready);
        assert_eq!(outcome.states, vec![NodeState::Ready, NodeState::Ready]);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn probe_without_pid_file_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let mut nodes = started(&dir, 1);
        let probe = Arc::new(SetProbe::default());
        probe.mark_ready(0);

        let barrier = ReadinessBarrier::new(
            probe,
            &WaitConfig {
                poll_interval_ms: 20,
                timeout_secs: 0,
                ..WaitConfig::default()
            },
        );
        let outcome = barrier.wait(&mut nodes).await;
        assert_eq!(outcome.verdict, Verdict::TimedOut);
        assert_eq!(outcome.states, vec![NodeState::Starting]);
    }

    #[tokio::test]
    async fn failure_marker_short_circuits_within_one_interval() {
        let dir = TempDir::new().unwrap();
        let mut nodes = started(&dir, 2);
        let probe = Arc::new(SetProbe::default());
        write_pid(&nodes[0]);
        probe.mark_ready(0);

        let marker = nodes[1].config.failure_marker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::write(marker, "").unwrap();
        });

        let barrier = ReadinessBarrier::new(probe, &wait_config(100, 30));
        let outcome = barrier.wait(&mut nodes).await;

        assert_eq!(outcome.verdict, Verdict::Failed(vec![1]));
        assert_eq!(outcome.states[1], NodeState::FailureMarker);
        assert!(outcome.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn setup_failure_fails_on_first_tick() {
        let dir = TempDir::new().unwrap();
        let mut nodes = started(&dir, 2);
        nodes[0].launch = Launch::NotStarted(ClusterError::ArtifactNotStaged {
            name: "analysis".into(),
        });

        let barrier = ReadinessBarrier::new(Arc::new(SetProbe::default()), &wait_config(500, 30));
        let outcome = barrier.wait(&mut nodes).await;

        assert_eq!(outcome.verdict, Verdict::Failed(vec![0]));
        assert!(matches!(outcome.states[0], NodeState::SetupFailed(_)));
        assert_eq!(outcome.states[1], NodeState::Starting);
        assert!(outcome.elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn never_ready_times_out() {
        let dir = TempDir::new().unwrap();
        let mut nodes = started(&dir, 1);

        let barrier = ReadinessBarrier::new(Arc::new(SetProbe::default()), &wait_config(100, 1));
        let outcome = barrier.wait(&mut nodes).await;

        assert_eq!(outcome.verdict, Verdict::TimedOut);
        assert!(outcome.elapsed >= Duration::from_secs(1));
        assert!(outcome.elapsed < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_foreground_child_fails() {
        let dir = TempDir::new().unwrap();
        let mut nodes = started(&dir, 1);
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("exit 4")
            .spawn()
            .unwrap();
        nodes[0].launch = Launch::Attached(child);

        let barrier = ReadinessBarrier::new(Arc::new(SetProbe::default()), &wait_config(50, 30));
        let outcome = barrier.wait(&mut nodes).await;

        assert_eq!(outcome.verdict, Verdict::Failed(vec![0]));
        assert_eq!(outcome.states[0], NodeState::Exited(Some(4)));
    }
}
