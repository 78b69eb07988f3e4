//! # testcluster-core
//!
//! Lifecycle orchestrator for ephemeral multi-node test clusters.
//!
//! A [`Cluster`] takes a [`ClusterConfiguration`](cluster_types::ClusterConfiguration)
//! and, for every node concurrently, runs the setup pipeline:
//!
//! ```text
//! clean -> check-previous -> stop-previous -> extract -> configure
//!       -> stage-extensions -> install-extensions -> setup-commands -> start
//! ```
//!
//! It then joins all nodes on the [`ReadinessBarrier`]. If any node fails or
//! the deadline passes, a single [`ClusterReport`] covering every node is
//! logged and returned, and whatever did start is stopped again.
//!
//! ## Components
//!
//! - [`SetupPipeline`] - ordered per-node stages
//! - [`supervisor`] - foreground or wrapper-daemonized server launch
//! - [`guard`] - stale pid file verification and pid-file based stop
//! - [`ReadinessBarrier`] - poll until ready, failed, or timed out
//! - [`diagnostics`] - per-node and aggregate failure reports
//! - [`ProcessTable`] / [`ReadinessProbe`] / [`ArchiveExtractor`] - pluggable
//!   collaborators, with test doubles alongside the real implementations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod barrier;
pub mod capture;
pub mod cluster;
pub mod command;
pub mod diagnostics;
pub mod error;
pub mod extensions;
pub mod guard;
pub mod identity;
pub mod pipeline;
pub mod probe;
pub mod settings;
pub mod supervisor;

pub use archive::{extractor_for, ArchiveExtractor, TarGzExtractor, ZipExtractor};
pub use barrier::{BarrierOutcome, ReadinessBarrier, Verdict};
pub use cluster::{Cluster, NodeStatus, RunningCluster};
pub use command::{ExecResult, OutputMode};
pub use diagnostics::{ClusterReport, FailureCause, NodeReport, NodeState};
pub use error::{ClusterError, Result};
pub use extensions::StagedArtifact;
pub use identity::{KillOutcome, ProcessTable, StaticProcessTable, SysinfoProcessTable};
pub use pipeline::{SetupPipeline, Stage};
pub use probe::{HttpProbe, ReadinessProbe};
pub use supervisor::{DaemonGroup, Launch, StartedNode};
