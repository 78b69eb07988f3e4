//! Process identity lookup.
//!
//! Pid files survive crashes, so a recorded pid on its own says nothing about
//! whether our server is still running: the id may have been recycled by an
//! unrelated program. Everything that acts on a pid goes through a
//! [`ProcessTable`], which maps live pids to a command identifier string.
//!
//! - [`SysinfoProcessTable`] - the real process table (via `sysinfo`)
//! - [`StaticProcessTable`] - a fixed table for tests

use crate::error::{ClusterError, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of a kill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The signal was delivered.
    Killed,
    /// No such process; nothing to do.
    AlreadyGone,
}

/// Pluggable view of the live processes on this machine.
pub trait ProcessTable: Send + Sync {
    /// All live processes: pid -> command identifier.
    ///
    /// Fails with [`ClusterError::ProcessLookupUnavailable`] when the platform
    /// cannot enumerate processes; callers must not proceed unverified.
    fn list(&self) -> Result<HashMap<u32, String>>;

    /// Forcefully terminate `pid`.
    fn kill(&self, pid: u32) -> Result<KillOutcome>;

    /// Command identifier of `pid`, if it is alive.
    fn identity_of(&self, pid: u32) -> Result<Option<String>> {
        Ok(self.list()?.remove(&pid))
    }
}

/// Returns true if `identity` (a process listing entry) belongs to a server
/// identified by `marker`.
pub fn is_server(identity: &str, marker: &str) -> bool {
    !marker.is_empty() && identity.contains(marker)
}

/// Process table backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl SysinfoProcessTable {
    fn snapshot() -> Result<sysinfo::System> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ClusterError::ProcessLookupUnavailable(format!(
                "sysinfo does not support {}",
                std::env::consts::OS
            )));
        }
        Ok(sysinfo::System::new_all())
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn list(&self) -> Result<HashMap<u32, String>> {
        let sys = Self::snapshot()?;
        Ok(sys
            .processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), describe(process)))
            .collect())
    }

    fn kill(&self, pid: u32) -> Result<KillOutcome> {
        let sys = Self::snapshot()?;
        match sys.process(sysinfo::Pid::from_u32(pid)) {
            None => Ok(KillOutcome::AlreadyGone),
            Some(process) if process.kill() => Ok(KillOutcome::Killed),
            Some(_) => Err(ClusterError::KillFailed { pid }),
        }
    }

    fn identity_of(&self, pid: u32) -> Result<Option<String>> {
        let sys = Self::snapshot()?;
        Ok(sys.process(sysinfo::Pid::from_u32(pid)).map(describe))
    }
}

/// Full command line, or the executable path for processes that hide it.
fn describe(process: &sysinfo::Process) -> String {
    let cmd = process
        .cmd()
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    if !cmd.is_empty() {
        return cmd;
    }
    process
        .exe()
        .map(|exe| exe.display().to_string())
        .unwrap_or_default()
}

/// In-memory process table.
///
/// Kills remove the entry and are recorded so tests can assert on them.
#[derive(Debug, Default)]
pub struct StaticProcessTable {
    processes: Mutex<HashMap<u32, String>>,
    killed: Mutex<Vec<u32>>,
    fail_kills: bool,
    unavailable: bool,
}

impl StaticProcessTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live process.
    pub fn with_process(self, pid: u32, identity: &str) -> Self {
        self.processes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pid, identity.to_string());
        self
    }

    /// Make every kill request fail.
    pub fn failing_kills(mut self) -> Self {
        self.fail_kills = true;
        self
    }

    /// Make listing fail as if the platform had no process lookup.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Pids that were killed, in order.
    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ProcessTable for StaticProcessTable {
    fn list(&self) -> Result<HashMap<u32, String>> {
        if self.unavailable {
            return Err(ClusterError::ProcessLookupUnavailable(
                "static table marked unavailable".into(),
            ));
        }
        Ok(self
            .processes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    fn kill(&self, pid: u32) -> Result<KillOutcome> {
        if self.fail_kills {
            return Err(ClusterError::KillFailed { pid });
        }
        let removed = self
            .processes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&pid);
        match removed {
            Some(_) => {
                self.killed
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(pid);
                Ok(KillOutcome::Killed)
            }
            None => Ok(KillOutcome::AlreadyGone),
        }
    }
}
