//! Per-node configuration derived from a [`ClusterConfiguration`].

use crate::buffer::OutputBuffer;
use crate::config::ClusterConfiguration;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Resolved identity and filesystem layout of one node.
///
/// Layout under `<work_dir>/<cluster>/node<i>/`:
///
/// ```text
/// node0/
/// ├── <home_dir_name>/      unpacked distribution (homeDir)
/// │   └── config/<file>     rendered configuration document
/// ├── run/                  working directory of every spawned process
/// │   ├── run.sh | run.bat  start wrapper
/// │   ├── run.log           combined output of a daemonized server
/// │   └── run.failed        written by the start wrapper on non-zero exit
/// ├── plugins-staging/      extension artifacts copied before install
/// └── server.pid            written by the server itself
/// ```
///
/// The pid file lives outside `run/` so that it survives the clean stage and
/// can be checked against a still-running previous instance.
#[derive(Debug, Clone)]
pub struct NodeConfiguration {
    /// Node index, 0-based.
    pub node_index: usize,
    /// Cluster identifier shared by all nodes.
    pub cluster_name: String,
    /// Root of this node's directory tree.
    pub base_dir: PathBuf,
    /// Working directory for every process spawned for this node.
    pub working_dir: PathBuf,
    /// Unpacked distribution.
    pub home_dir: PathBuf,
    /// Extension artifacts are copied here before installation.
    pub plugins_staging_dir: PathBuf,
    /// Process id file written by the running server.
    pub pid_file: PathBuf,
    /// Presence means the start wrapper saw a non-zero exit.
    pub failure_marker: PathBuf,
    /// Combined output of a daemonized server.
    pub startup_log: PathBuf,
    /// Start wrapper used in daemon mode.
    pub wrapper_script: PathBuf,
    /// Rendered configuration document.
    pub config_file: PathBuf,
    /// Server executable.
    pub executable: PathBuf,
    /// HTTP port (`base_http_port + node_index`).
    pub http_port: u16,
    /// Transport port (`base_transport_port + node_index`).
    pub transport_port: u16,
    /// Environment for every process spawned for this node.
    pub env: BTreeMap<String, String>,
    /// Server arguments.
    pub args: Vec<String>,
    /// Output captured when it is not streamed live.
    pub output: OutputBuffer,
}

impl NodeConfiguration {
    /// Derive the configuration of node `index`.
    pub fn new(cluster: &ClusterConfiguration, index: usize) -> Self {
        let dist = &cluster.distribution;
        let base_dir = cluster.cluster_dir().join(format!("node{index}"));
        let home_dir = base_dir.join(&dist.home_dir_name);
        let working_dir = base_dir.join("run");
        let wrapper = if cfg!(windows) { "run.bat" } else { "run.sh" };

        let mut args = cluster.process_args.clone();
        args.extend(
            cluster
                .system_properties
                .iter()
                .map(|(key, value)| format!("-D{key}={value}")),
        );

        Self {
            node_index: index,
            cluster_name: cluster.name.clone(),
            plugins_staging_dir: base_dir.join("plugins-staging"),
            pid_file: base_dir.join("server.pid"),
            failure_marker: working_dir.join("run.failed"),
            startup_log: working_dir.join("run.log"),
            wrapper_script: working_dir.join(wrapper),
            working_dir,
            config_file: home_dir.join("config").join(&dist.config_file_name),
            executable: home_dir.join(&dist.executable),
            home_dir,
            base_dir,
            http_port: cluster.http_port(index),
            transport_port: cluster.transport_port(index),
            env: cluster.env.clone(),
            args,
            output: OutputBuffer::new(),
        }
    }

    /// Short name used in logs (`node0`, `node1`, ...).
    pub fn name(&self) -> String {
        format!("node{}", self.node_index)
    }

    /// Full start command: executable followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.executable.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// URL probed by the readiness barrier.
    pub fn http_url(&self) -> String {
        format!("http://localhost:{}", self.http_port)
    }

    /// Resolve a program name for a command run on behalf of this node.
    ///
    /// Relative paths with a directory component (`bin/tool`) are resolved
    /// against the home directory; bare names are left for `PATH` lookup.
    pub fn resolve_program(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_relative() && path.components().count() > 1 {
            self.home_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }
}
