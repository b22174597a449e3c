use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ToolCommand;
use crate::error::SlidecastError;

const STDERR_TAIL_CHARS: usize = 500;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of one external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Succeeded,
    Missing,
    /// Ran but did not succeed. `exit_code` is `None` for a timeout, a signal
    /// or a spawn failure other than "not found".
    Failed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
}

impl ToolStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Maps a non-success status to the error kind for `tool`.
    pub fn into_result(self, tool: &ToolCommand) -> Result<(), SlidecastError> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Missing => Err(SlidecastError::MissingExternalTool { tool: tool.label() }),
            Self::Failed {
                exit_code,
                stderr_tail,
            } => Err(SlidecastError::EncodeFailure {
                tool: tool.label(),
                status: exit_code.map_or_else(
                    || "no exit code".to_owned(),
                    |code| format!("exit code {code}"),
                ),
                stderr_tail,
            }),
        }
    }
}

/// Runs `tool` with `args` appended after its leading arguments. The child is
/// killed once `timeout` elapses.
pub fn run_tool(tool: &ToolCommand, args: &[String], timeout: Duration) -> ToolStatus {
    let mut command = Command::new(&tool.program);
    command
        .args(&tool.args)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!(
        tool = %tool.program.display(),
        args = %tool.args.iter().chain(args).cloned().collect::<Vec<_>>().join(" "),
        "spawning external tool"
    );

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) if error.kind() == ErrorKind::NotFound => return ToolStatus::Missing,
        Err(error) => {
            return ToolStatus::Failed {
                exit_code: None,
                stderr_tail: format!("failed to spawn {}: {error}", tool.program.display()),
            }
        }
    };

    // Drain stderr on a side thread so a chatty tool cannot block on a full pipe.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    match wait_with_timeout(&mut child, timeout) {
        Ok(Some(status)) if status.success() => ToolStatus::Succeeded,
        Ok(Some(status)) => {
            let stderr = stderr_reader
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default();
            ToolStatus::Failed {
                exit_code: status.code(),
                stderr_tail: last_n_chars(&stderr, STDERR_TAIL_CHARS),
            }
        }
        // Grandchildren may still hold the stderr pipe, so the reader is left detached.
        Ok(None) => ToolStatus::Failed {
            exit_code: None,
            stderr_tail: format!("timed out after {:.1} seconds", timeout.as_secs_f64()),
        },
        Err(error) => ToolStatus::Failed {
            exit_code: None,
            stderr_tail: format!("failed while waiting for {}: {error}", tool.label()),
        },
    }
}

/// `Ok(None)` means the child was killed after the timeout.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if started.elapsed() > timeout {
            child.kill()?;
            let _ = child.wait();
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Probes whether `tool` answers `version_arg` successfully within `timeout`.
pub fn is_available(tool: &ToolCommand, version_arg: &str, timeout: Duration) -> bool {
    run_tool(tool, &[version_arg.to_owned()], timeout).is_success()
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}
