//! Cluster configuration loading.
//!
//! Configuration is loaded from a TOML file (conventionally `cluster.toml`).
//! Every field except `[distribution]` has a default, so a minimal file only
//! needs to say which archive to unpack.

use crate::error::ConfigError;
use crate::node::NodeConfiguration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys of the rendered configuration document that are derived per node.
/// `[settings]` may not use them.
pub const RESERVED_SETTINGS: &[&str] = &[
    "cluster.name",
    "node.name",
    "pidfile",
    "http.port",
    "transport.port",
    "discovery.seed_hosts",
    "path.shared_data",
    "path.repo",
    "node.attr.testattr",
];

/// Shared description of one test cluster.
///
/// Immutable once setup begins; every [`NodeConfiguration`] is derived from it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfiguration {
    /// Stable identifier shared by all nodes of this cluster.
    #[serde(default = "default_cluster_name")]
    pub name: String,
    /// Number of nodes (>= 1).
    #[serde(default = "default_num_nodes")]
    pub num_nodes: usize,
    /// HTTP port of node 0; node i uses `base_http_port + i`.
    #[serde(default = "default_base_http_port")]
    pub base_http_port: u16,
    /// Transport port of node 0; node i uses `base_transport_port + i`.
    #[serde(default = "default_base_transport_port")]
    pub base_transport_port: u16,
    /// Run nodes detached from the orchestrator (default: true).
    #[serde(default = "default_daemonize")]
    pub daemonize: bool,
    /// Stream all setup output live instead of buffering it.
    #[serde(default)]
    pub debug: bool,
    /// Per-task root directory. Nodes live under `<work_dir>/<name>/node<i>`.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Extra arguments passed to the server before system properties.
    #[serde(default)]
    pub process_args: Vec<String>,
    /// Forwarded to the server as `-D<key>=<value>` arguments.
    #[serde(default)]
    pub system_properties: BTreeMap<String, String>,
    /// Extra environment for every process spawned for a node.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra lines for the rendered configuration document.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Server distribution to unpack into every node.
    pub distribution: DistributionConfig,
    /// Extension name -> artifact path.
    #[serde(default)]
    pub extensions: BTreeMap<String, PathBuf>,
    /// Commands run in order inside each node's working directory.
    #[serde(default)]
    pub setup_commands: Vec<SetupCommand>,
    /// Readiness barrier timing.
    #[serde(default)]
    pub wait: WaitConfig,
}

/// Archive format of the server distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionKind {
    /// Gzip-compressed tarball.
    TarGz,
    /// Zip archive.
    Zip,
}

impl DistributionKind {
    /// Conventional file extension for this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            DistributionKind::TarGz => "tar.gz",
            DistributionKind::Zip => "zip",
        }
    }
}

impl std::fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionKind::TarGz => write!(f, "tar-gz"),
            DistributionKind::Zip => write!(f, "zip"),
        }
    }
}

impl std::str::FromStr for DistributionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tar-gz" | "tar.gz" | "tgz" => Ok(DistributionKind::TarGz),
            "zip" => Ok(DistributionKind::Zip),
            other => Err(ConfigError::Invalid(format!(
                "unknown distribution kind: {other}"
            ))),
        }
    }
}

/// Where the server comes from and how it is laid out once unpacked.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    /// Archive format.
    pub kind: DistributionKind,
    /// Path to the archive.
    pub archive: PathBuf,
    /// Top-level directory inside the archive; becomes each node's home.
    #[serde(default = "default_home_dir_name")]
    pub home_dir_name: String,
    /// Server start script, relative to the home directory.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// File name of the rendered configuration document under `<home>/config`.
    #[serde(default = "default_config_file_name")]
    pub config_file_name: String,
    /// Extension installer program and leading arguments.
    #[serde(default = "default_plugin_installer")]
    pub plugin_installer: Vec<String>,
    /// Substring identifying this server in a process listing.
    /// Defaults to the executable's file name.
    #[serde(default)]
    pub identity: Option<String>,
}

impl DistributionConfig {
    /// Create a distribution description with default layout.
    pub fn new(kind: DistributionKind, archive: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            archive: archive.into(),
            home_dir_name: default_home_dir_name(),
            executable: default_executable(),
            config_file_name: default_config_file_name(),
            plugin_installer: default_plugin_installer(),
            identity: None,
        }
    }

    /// The string a live process must contain to count as this server.
    pub fn identity(&self) -> String {
        match &self.identity {
            Some(identity) => identity.clone(),
            None => self
                .executable
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.executable.to_string_lossy().into_owned()),
        }
    }
}

/// A named setup command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetupCommand {
    /// Name used in logs and errors.
    pub name: String,
    /// Argument vector; the first element is the program.
    pub command: Vec<String>,
}

impl SetupCommand {
    /// Create a setup command.
    pub fn new(name: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Readiness barrier timing.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    /// Poll interval in milliseconds (default: 500).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hard deadline for the whole cluster in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for a single HTTP probe in milliseconds (default: 500).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Lines of the startup log included in diagnostics (default: 50).
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

impl WaitConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

// Default value functions
fn default_cluster_name() -> String {
    let id = uuid::Uuid::new_v4().as_simple().to_string();
    format!("test-cluster-{}", &id[..8])
}

fn default_num_nodes() -> usize {
    1
}

fn default_base_http_port() -> u16 {
    9200
}

fn default_base_transport_port() -> u16 {
    9300
}

fn default_daemonize() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("build/cluster")
}

fn default_home_dir_name() -> String {
    "server".to_string()
}

fn default_executable() -> PathBuf {
    PathBuf::from("bin/server")
}

fn default_config_file_name() -> String {
    "server.yml".to_string()
}

fn default_plugin_installer() -> Vec<String> {
    vec!["bin/server-plugin".to_string(), "install".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_log_tail_lines() -> usize {
    50
}

impl ClusterConfiguration {
    /// Create a configuration with defaults for everything but the distribution.
    pub fn new(distribution: DistributionConfig) -> Self {
        Self {
            name: default_cluster_name(),
            num_nodes: default_num_nodes(),
            base_http_port: default_base_http_port(),
            base_transport_port: default_base_transport_port(),
            daemonize: default_daemonize(),
            debug: false,
            work_dir: default_work_dir(),
            process_args: Vec::new(),
            system_properties: BTreeMap::new(),
            env: BTreeMap::new(),
            settings: BTreeMap::new(),
            distribution,
            extensions: BTreeMap::new(),
            setup_commands: Vec::new(),
            wait: WaitConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed
    /// (including an unknown distribution kind), or fails [`validate`](Self::validate).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes == 0 {
            return Err(ConfigError::Invalid("num_nodes must be >= 1".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster name must not be empty".into()));
        }

        let last = self.num_nodes - 1;
        for (label, base) in [
            ("base_http_port", self.base_http_port),
            ("base_transport_port", self.base_transport_port),
        ] {
            if base as usize + last > u16::MAX as usize {
                return Err(ConfigError::Invalid(format!(
                    "{label} {base} + {} nodes exceeds port range",
                    self.num_nodes
                )));
            }
        }

        let http = self.base_http_port as usize..=self.base_http_port as usize + last;
        let transport =
            self.base_transport_port as usize..=self.base_transport_port as usize + last;
        if http.start() <= transport.end() && transport.start() <= http.end() {
            return Err(ConfigError::Invalid(format!(
                "http ports {}-{} overlap transport ports {}-{}",
                http.start(),
                http.end(),
                transport.start(),
                transport.end()
            )));
        }

        if self.distribution.executable.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "distribution.executable must not be empty".into(),
            ));
        }
        if self.distribution.plugin_installer.is_empty() {
            return Err(ConfigError::Invalid(
                "distribution.plugin_installer must not be empty".into(),
            ));
        }
        if let Some(cmd) = self.setup_commands.iter().find(|c| c.command.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "setup command '{}' has an empty argument vector",
                cmd.name
            )));
        }

        // Each extension is staged into a directory named after it.
        if let Some(name) = self.extensions.keys().find(|name| {
            name.is_empty() || *name == "." || *name == ".." || name.contains(['/', '\\'])
        }) {
            return Err(ConfigError::Invalid(format!(
                "extension name {name:?} is not a valid directory name"
            )));
        }

        if self.wait.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("wait.poll_interval_ms must be > 0".into()));
        }
        if self.wait.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("wait.probe_timeout_ms must be > 0".into()));
        }

        for (key, value) in &self.settings {
            if RESERVED_SETTINGS.contains(&key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "setting '{key}' is managed per node and cannot be overridden"
                )));
            }
            if key.is_empty() || key.contains(['\n', '\r']) {
                return Err(ConfigError::Invalid(format!("invalid setting key {key:?}")));
            }
            if value.contains(['\n', '\r']) {
                return Err(ConfigError::Invalid(format!(
                    "setting '{key}' must be a single line"
                )));
            }
        }

        Ok(())
    }

    /// Directory holding every node of this cluster.
    pub fn cluster_dir(&self) -> PathBuf {
        self.work_dir.join(&self.name)
    }

    /// Directory shared by all nodes (shared data and snapshot repository).
    pub fn shared_dir(&self) -> PathBuf {
        self.cluster_dir().join("shared")
    }

    /// HTTP port of node `index`.
    pub fn http_port(&self, index: usize) -> u16 {
        self.base_http_port + index as u16
    }

    /// Transport port of node `index`.
    pub fn transport_port(&self, index: usize) -> u16 {
        self.base_transport_port + index as u16
    }

    /// Discovery seed list: every node's loopback transport address, in
    /// ascending node-index order, comma-joined.
    pub fn seed_hosts(&self) -> String {
        (0..self.num_nodes)
            .map(|i| format!("127.0.0.1:{}", self.transport_port(i)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Derive one [`NodeConfiguration`] per node index.
    pub fn nodes(&self) -> Vec<NodeConfiguration> {
        (0..self.num_nodes)
            .map(|index| NodeConfiguration::new(self, index))
            .collect()
    }
}
