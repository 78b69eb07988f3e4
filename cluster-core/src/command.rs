//! Running helper commands on behalf of a node.
//!
//! Setup commands, extension installs, and archive extraction all go through
//! [`run`] / [`run_ok`]. Output is buffered (stdout and stderr interleaved into
//! one stream) and only surfaced when the command fails; in live mode it is
//! inherited from the orchestrator instead.

use crate::error::{ClusterError, Result};
use cluster_types::{NodeConfiguration, OutputBuffer};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// How a command's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture combined output; surface it only on failure.
    Buffered,
    /// Inherit the orchestrator's stdout/stderr.
    Live,
}

impl OutputMode {
    /// Live when debugging, buffered otherwise.
    pub fn for_debug(debug: bool) -> Self {
        if debug {
            OutputMode::Live
        } else {
            OutputMode::Buffered
        }
    }
}

/// Result of running a command to completion.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Combined stdout and stderr (empty in live mode).
    pub output: String,
    /// Exit code (`None` if terminated by a signal).
    pub exit_code: Option<i32>,
}

impl ExecResult {
    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `argv` for `node` in `cwd` and wait for it to exit.
///
/// The first element of `argv` is resolved with
/// [`NodeConfiguration::resolve_program`]. The node's environment is applied.
/// Does NOT fail on non-zero exit; use [`run_ok`] for that.
pub async fn run(
    node: &NodeConfiguration,
    argv: &[String],
    cwd: &Path,
    mode: OutputMode,
) -> Result<ExecResult> {
    let (program, args) = argv.split_first().ok_or_else(|| ClusterError::Spawn {
        node: node.node_index,
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argument vector"),
    })?;
    let program = node.resolve_program(program);

    let mut command = Command::new(&program);
    command
        .args(args)
        .envs(&node.env)
        .current_dir(cwd)
        .stdin(Stdio::null());

    tracing::debug!("{}: running {:?} in {}", node.name(), argv, cwd.display());

    let spawn_error = |source| ClusterError::Spawn {
        node: node.node_index,
        program: program.display().to_string(),
        source,
    };

    match mode {
        OutputMode::Live => {
            let status = command
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(spawn_error)?;
            Ok(ExecResult {
                output: String::new(),
                exit_code: status.code(),
            })
        }
        OutputMode::Buffered => {
            let mut child = command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(spawn_error)?;

            let buffer = OutputBuffer::new();
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (status, _, _) = tokio::join!(
                child.wait(),
                pump(stdout, buffer.clone()),
                pump(stderr, buffer.clone()),
            );

            Ok(ExecResult {
                output: buffer.contents(),
                exit_code: status?.code(),
            })
        }
    }
}

/// Run `argv` and fail with [`ClusterError::CommandFailed`] on non-zero exit.
pub async fn run_ok(
    node: &NodeConfiguration,
    argv: &[String],
    cwd: &Path,
    mode: OutputMode,
) -> Result<ExecResult> {
    let result = run(node, argv, cwd, mode).await?;
    if !result.success() {
        return Err(ClusterError::CommandFailed {
            node: node.node_index,
            argv: argv.to_vec(),
            exit_code: result.exit_code,
            output: result.output,
        });
    }
    Ok(result)
}

/// Copy everything from `reader` into `sink` until EOF.
pub(crate) async fn pump<R>(reader: Option<R>, sink: OutputBuffer)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.append(&chunk[..n]),
        }
    }
}
