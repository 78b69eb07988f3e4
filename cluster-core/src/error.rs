//! Error types for cluster orchestration.

use crate::diagnostics::ClusterReport;
use crate::pipeline::Stage;
use cluster_types::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up, starting, or stopping a cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Configuration error. Fatal before anything is spawned.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A pid file points at a live instance of this server.
    #[error(
        "node{node}: stale pid file {pid_file} belongs to live process {pid} ({identity}), \
         was a previous cluster not stopped?"
    )]
    StaleProcess {
        /// Node index.
        node: usize,
        /// Recorded process id.
        pid: u32,
        /// Command identifier reported by the process listing.
        identity: String,
        /// Pid file that was found.
        pid_file: PathBuf,
    },

    /// The process listing is not available on this platform.
    #[error("process lookup unavailable: {0}")]
    ProcessLookupUnavailable(String),

    /// A pid file did not contain a process id.
    #[error("invalid pid file {path}: {content:?}")]
    InvalidPidFile {
        /// Pid file path.
        path: PathBuf,
        /// Trimmed file contents.
        content: String,
    },

    /// Sending the kill signal failed.
    #[error("failed to kill process {pid}")]
    KillFailed {
        /// Process id.
        pid: u32,
    },

    /// A program could not be spawned at all.
    #[error("node{node}: failed to spawn {program}: {source}")]
    Spawn {
        /// Node index.
        node: usize,
        /// Program path.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A setup, install, or extraction command exited non-zero.
    #[error(
        "node{node}: command {argv:?} failed with {}{}",
        describe_exit(.exit_code),
        indent_output(.output)
    )]
    CommandFailed {
        /// Node index.
        node: usize,
        /// Argument vector as configured.
        argv: Vec<String>,
        /// Exit code (`None` if killed by a signal).
        exit_code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },

    /// The unpacked archive did not have the expected layout.
    #[error("node{node}: {archive} did not unpack into {expected}")]
    Distribution {
        /// Node index.
        node: usize,
        /// Archive path.
        archive: PathBuf,
        /// Expected home directory.
        expected: PathBuf,
    },

    /// An extension artifact could not be staged.
    #[error("extension '{name}': cannot stage {path}: {source}")]
    Artifact {
        /// Extension name.
        name: String,
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An extension's staged location was requested before staging ran.
    #[error("extension '{name}' has not been staged yet")]
    ArtifactNotStaged {
        /// Extension name.
        name: String,
    },

    /// A stage of one node's setup pipeline failed.
    #[error("node{node}: {stage} failed: {source}")]
    Stage {
        /// Node index.
        node: usize,
        /// Failed stage.
        stage: Stage,
        /// Cause.
        #[source]
        source: Box<ClusterError>,
    },

    /// The cluster did not become healthy. Carries diagnostics for every node.
    #[error("{0}")]
    StartupFailed(Box<ClusterReport>),

    /// One or more nodes could not be stopped. Every node was still attempted.
    #[error("teardown failed: {}", join_failures(.failures))]
    Teardown {
        /// (node index, error text) per failed node.
        failures: Vec<(usize, String)>,
    },

    /// HTTP client construction error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Wrap `self` as the failure of `stage` on `node`.
    pub fn in_stage(self, node: usize, stage: Stage) -> Self {
        ClusterError::Stage {
            node,
            stage,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through stage wrappers.
    pub fn root(&self) -> &ClusterError {
        match self {
            ClusterError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn indent_output(output: &str) -> String {
    if output.trim().is_empty() {
        return String::new();
    }
    let mut text = String::from("\noutput:");
    for line in output.lines() {
        text.push_str("\n  ");
        text.push_str(line);
    }
    text
}

fn join_failures(failures: &[(usize, String)]) -> String {
    failures
        .iter()
        .map(|(node, err)| format!("node{node}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
