//! Process supervisor: launches one node's server.
//!
//! Foreground nodes are direct children with inherited stdio. Daemonized
//! nodes are started through a small wrapper script that
//!
//! 1. runs the real start command,
//! 2. redirects its combined output to the node's startup log,
//! 3. touches the failure marker if and only if the command exits non-zero.
//!
//! The wrapper runs in its own process group so it outlives an interrupted
//! orchestrator. Whatever the wrapper itself prints is pumped into the node's
//! output buffer. The server writes its own pid file; nothing here does, but
//! the wrapper's [`DaemonGroup`] lets teardown reach a server that has not
//! written one yet.

use crate::command::pump;
use crate::error::{ClusterError, Result};
use cluster_types::NodeConfiguration;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};

/// How a node's server was launched.
#[derive(Debug)]
pub enum Launch {
    /// Foreground child owned by the orchestrator.
    Attached(Child),
    /// Started through the wrapper; tracked by pid file, failure marker,
    /// and the wrapper's process group.
    Detached(DaemonGroup),
    /// The setup pipeline failed before the server was started.
    NotStarted(ClusterError),
}

impl Launch {
    /// Returns true if a server process was spawned.
    pub fn is_started(&self) -> bool {
        !matches!(self, Launch::NotStarted(_))
    }
}

/// Process group of a daemonized node's wrapper script.
///
/// The group id is the wrapper's pid. It is only signalled until the wrapper
/// has been reaped; after that the id may belong to someone else.
#[derive(Debug, Clone, Default)]
pub struct DaemonGroup {
    pgid: Option<u32>,
    running: Arc<AtomicBool>,
}

impl DaemonGroup {
    fn spawned(pgid: Option<u32>) -> Self {
        Self {
            pgid,
            running: Arc::new(AtomicBool::new(pgid.is_some())),
        }
    }

    /// Process group id, if the wrapper reported a pid.
    pub fn pgid(&self) -> Option<u32> {
        self.pgid
    }

    /// Returns true until the wrapper has exited and been reaped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Kill the wrapper and everything it started.
    ///
    /// Returns `Ok(false)` if there was nothing left to signal.
    pub fn kill(&self) -> Result<bool> {
        match self.pgid {
            Some(pgid) if self.is_running() => kill_group(pgid),
            _ => Ok(false),
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(_) => Err(ClusterError::KillFailed { pid: pgid }),
    }
}

// No process groups here; the pid file is the only handle.
#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> Result<bool> {
    Ok(false)
}

/// A node after its start stage was issued.
#[derive(Debug)]
pub struct StartedNode {
    /// Node configuration.
    pub config: NodeConfiguration,
    /// Launch result.
    pub launch: Launch,
}

/// Start `node`, daemonized or in the foreground.
pub async fn start(node: &NodeConfiguration, daemonize: bool) -> Result<Launch> {
    if daemonize {
        start_detached(node).await
    } else {
        start_attached(node)
    }
}

fn start_attached(node: &NodeConfiguration) -> Result<Launch> {
    tracing::info!(
        "{}: starting {} in foreground",
        node.name(),
        node.executable.display()
    );
    let child = Command::new(&node.executable)
        .args(&node.args)
        .envs(&node.env)
        .current_dir(&node.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ClusterError::Spawn {
            node: node.node_index,
            program: node.executable.display().to_string(),
            source,
        })?;
    Ok(Launch::Attached(child))
}

async fn start_detached(node: &NodeConfiguration) -> Result<Launch> {
    tokio::fs::write(&node.wrapper_script, render_wrapper(node)).await?;

    let mut command = wrapper_command(node);
    command
        .envs(&node.env)
        .current_dir(&node.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    command.process_group(0);

    tracing::info!(
        "{}: starting {} via {}",
        node.name(),
        node.executable.display(),
        node.wrapper_script.display()
    );
    let mut child = command.spawn().map_err(|source| ClusterError::Spawn {
        node: node.node_index,
        program: node.wrapper_script.display().to_string(),
        source,
    })?;

    let group = DaemonGroup::spawned(child.id());
    let reaped = group.clone();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let output = node.output.clone();
    tokio::spawn(async move {
        tokio::join!(pump(stdout, output.clone()), pump(stderr, output));
        let _ = child.wait().await;
        reaped.running.store(false, Ordering::SeqCst);
    });

    Ok(Launch::Detached(group))
}

#[cfg(unix)]
fn wrapper_command(node: &NodeConfiguration) -> Command {
    let mut command = Command::new("sh");
    command.arg(&node.wrapper_script);
    command
}

#[cfg(windows)]
fn wrapper_command(node: &NodeConfiguration) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(&node.wrapper_script);
    command
}

/// Wrapper script contents for a daemonized start.
#[cfg(unix)]
pub fn render_wrapper(node: &NodeConfiguration) -> String {
    let command = node
        .command_line()
        .iter()
        .map(|arg| sh_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "#!/bin/sh\n\
         cd {cwd} || exit 1\n\
         {command} > {log} 2>&1\n\
         status=$?\n\
         if [ $status -ne 0 ]; then touch {marker}; fi\n\
         exit $status\n",
        cwd = sh_quote(&node.working_dir.to_string_lossy()),
        log = sh_quote(&node.startup_log.to_string_lossy()),
        marker = sh_quote(&node.failure_marker.to_string_lossy()),
    )
}

/// Wrapper script contents for a daemonized start.
#[cfg(windows)]
pub fn render_wrapper(node: &NodeConfiguration) -> String {
    let command = node
        .command_line()
        .iter()
        .map(|arg| format!("\"{arg}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "@echo off\r\n\
         cd /d \"{cwd}\" || exit /b 1\r\n\
         {command} > \"{log}\" 2>&1\r\n\
         if errorlevel 1 type nul > \"{marker}\"\r\n\
         exit /b %errorlevel%\r\n",
        cwd = node.working_dir.display(),
        log = node.startup_log.display(),
        marker = node.failure_marker.display(),
    )
}

/// Single-quote `value` for `/bin/sh`.
#[cfg(unix)]
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
