//! Stale-instance guard and pid-file based stop.
//!
//! A pid file left behind by a previous run is only trusted after checking the
//! recorded pid against a [`ProcessTable`]:
//!
//! | pid file | listing says                 | check-previous | stop-previous        |
//! |----------|------------------------------|----------------|----------------------|
//! | absent   | -                            | pass           | no-op                |
//! | present  | pid not alive                | pass (stale)   | delete file          |
//! | present  | pid alive, other program     | pass (stale)   | delete file, no kill |
//! | present  | pid alive, this server       | **fail**       | kill, delete file    |

use crate::error::{ClusterError, Result};
use crate::identity::{is_server, KillOutcome, ProcessTable};
use cluster_types::NodeConfiguration;
use std::io::ErrorKind;
use std::path::Path;

/// Contents of a pid file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidFile {
    /// No pid file.
    Absent,
    /// Trimmed contents parsed as a process id.
    Pid(u32),
    /// File exists but does not hold a process id.
    Garbage(String),
}

/// Read a pid file as trimmed text.
pub fn read_pid_file(path: &Path) -> Result<PidFile> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PidFile::Absent),
        Err(e) => return Err(e.into()),
    };
    let trimmed = content.trim();
    Ok(match trimmed.parse::<u32>() {
        Ok(pid) => PidFile::Pid(pid),
        Err(_) => PidFile::Garbage(trimmed.to_string()),
    })
}

fn remove_pid_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Refuse to start `node` if its pid file points at a live instance of the
/// server identified by `marker`.
///
/// A pid that is not alive, or that belongs to an unrelated program, is a
/// stale leftover and passes without anything being stopped.
pub fn check_previous(
    node: &NodeConfiguration,
    processes: &dyn ProcessTable,
    marker: &str,
) -> Result<()> {
    let pid = match read_pid_file(&node.pid_file)? {
        PidFile::Absent => return Ok(()),
        PidFile::Garbage(content) => {
            tracing::warn!(
                "{}: ignoring unreadable pid file {} ({:?})",
                node.name(),
                node.pid_file.display(),
                content
            );
            return Ok(());
        }
        PidFile::Pid(pid) => pid,
    };

    match processes.identity_of(pid)? {
        Some(identity) if is_server(&identity, marker) => Err(ClusterError::StaleProcess {
            node: node.node_index,
            pid,
            identity,
            pid_file: node.pid_file.clone(),
        }),
        Some(identity) => {
            tracing::warn!(
                "{}: pid {} from stale pid file now belongs to '{}', leaving it alone",
                node.name(),
                pid,
                identity
            );
            Ok(())
        }
        None => {
            tracing::debug!("{}: pid {} from stale pid file is gone", node.name(), pid);
            Ok(())
        }
    }
}

/// Terminate whatever a leftover pid file records, then delete the file.
///
/// "Already gone" counts as success. A pid that the listing attributes to an
/// unrelated program is never killed.
pub fn stop_previous(
    node: &NodeConfiguration,
    processes: &dyn ProcessTable,
    marker: &str,
) -> Result<()> {
    let pid = match read_pid_file(&node.pid_file)? {
        PidFile::Absent => return Ok(()),
        PidFile::Garbage(_) => return remove_pid_file(&node.pid_file),
        PidFile::Pid(pid) => pid,
    };

    match processes.identity_of(pid)? {
        Some(identity) if is_server(&identity, marker) => {
            tracing::info!("{}: killing previous instance (pid {})", node.name(), pid);
            processes.kill(pid)?;
        }
        Some(_) => {
            tracing::debug!("{}: not killing unrelated pid {}", node.name(), pid);
        }
        None => {}
    }

    remove_pid_file(&node.pid_file)
}

/// Stop a node by its pid file.
///
/// No pid file means the node is already down. Otherwise the recorded pid is
/// killed and the pid file is deleted, even if the kill failed; the kill error
/// is returned afterwards.
pub fn stop_node(node: &NodeConfiguration, processes: &dyn ProcessTable) -> Result<KillOutcome> {
    let kill = match read_pid_file(&node.pid_file)? {
        PidFile::Absent => return Ok(KillOutcome::AlreadyGone),
        PidFile::Pid(pid) => processes.kill(pid),
        PidFile::Garbage(content) => Err(ClusterError::InvalidPidFile {
            path: node.pid_file.clone(),
            content,
        }),
    };

    remove_pid_file(&node.pid_file)?;

    let outcome = kill?;
    tracing::debug!("{}: stopped ({:?})", node.name(), outcome);
    Ok(outcome)
}
