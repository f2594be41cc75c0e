//! Subprocess plumbing shared by the CLI-backed engines.
//!
//! [`drive`] spawns the backend, decodes its stdout as JSONL and hands each
//! event to a [`StreamTranslator`]. Stderr is drained into `tracing::debug!`
//! and its tail kept for error messages. When the run's cancel signal fires,
//! the child is terminated (SIGTERM, short grace, then kill) and
//! [`EngineError::Cancelled`] is returned.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::pin::pin;
use std::process::Stdio;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::config::{ConfigError, RunConfig};

use super::trait_def::EngineCallbacks;
use super::types::EngineError;

/// How many trailing stderr lines are kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Grace period between SIGTERM and kill.
const TERM_GRACE: Duration = Duration::from_secs(3);

/// Per-backend translation of decoded JSONL events.
pub trait StreamTranslator: Send {
    /// Fold one event, reporting through `callbacks`. An error aborts the run.
    fn translate(&mut self, event: &Value, callbacks: &dyn EngineCallbacks)
    -> Result<(), EngineError>;

    /// Whether the backend's terminal event has been seen.
    fn is_complete(&self) -> bool;
}

/// A backend invocation: binary, arguments, directory and PATH additions.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub binary: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Directories prepended to the child's `PATH`. The parent's
    /// environment is never modified.
    pub extra_path: Vec<String>,
}

impl CommandSpec {
    /// Start a spec from the run's option bag (`binary`, `extra_path`).
    pub fn from_config(default_binary: &str, config: &RunConfig) -> Result<Self, EngineError> {
        Ok(Self {
            binary: config
                .option_str("binary")
                .unwrap_or(default_binary)
                .to_string(),
            args: Vec::new(),
            working_dir: config.working_dir.clone(),
            extra_path: config.option_str_list("extra_path")?,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Result<Command, EngineError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.extra_path.is_empty() {
            cmd.env("PATH", self.search_path()?);
        }
        Ok(cmd)
    }

    fn search_path(&self) -> Result<OsString, EngineError> {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .extra_path
            .iter()
            .map(PathBuf::from)
            .chain(std::env::split_paths(&inherited));
        std::env::join_paths(dirs).map_err(|e| {
            EngineError::Config(ConfigError::InvalidOption {
                key: "extra_path".to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// Run the backend described by `spec` to completion.
///
/// Returns `Ok(())` once the child has exited after emitting its terminal
/// event. A non-zero exit before that point is [`EngineError::Exited`]; a
/// clean exit without it is [`EngineError::Protocol`].
pub async fn drive(
    spec: &CommandSpec,
    cancel: &CancelSignal,
    callbacks: &dyn EngineCallbacks,
    translator: &mut dyn StreamTranslator,
) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let mut child = spec
        .command()?
        .spawn()
        .map_err(|source| EngineError::Spawn {
            binary: spec.binary.clone(),
            source,
        })?;
    debug!(binary = %spec.binary, pid = ?child.id(), "spawned backend");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::Protocol("backend stdout was not captured".to_string()))?;
    let mut stderr_lines = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
    let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut events = pin!(json_lines(stdout));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(EngineError::Cancelled);
            }
            event = events.next() => match event {
                Some(Ok(value)) => {
                    if let Err(e) = translator.translate(&value, callbacks) {
                        terminate(&mut child).await;
                        return Err(e);
                    }
                }
                Some(Err(e)) => {
                    terminate(&mut child).await;
                    return Err(e.into());
                }
                None => break,
            },
            line = next_stderr_line(&mut stderr_lines) => match line {
                Some(line) => push_tail(&mut stderr_tail, line),
                None => stderr_lines = None,
            },
        }
    }

    // Stdout is closed; keep draining stderr until the child is reaped.
    let status = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(EngineError::Cancelled);
            }
            status = child.wait() => break status?,
            line = next_stderr_line(&mut stderr_lines) => match line {
                Some(line) => push_tail(&mut stderr_tail, line),
                None => stderr_lines = None,
            },
        }
    };

    if translator.is_complete() {
        if !status.success() {
            warn!(%status, "backend exited non-zero after its final event");
        }
        return Ok(());
    }
    if !status.success() {
        return Err(EngineError::Exited {
            status: status.to_string(),
            stderr: Vec::from(stderr_tail).join("\n"),
        });
    }
    Err(EngineError::Protocol(
        "stream ended before the backend reported a final result".to_string(),
    ))
}

/// Decode a reader as JSONL. Blank, malformed and non-UTF-8 lines are
/// skipped.
fn json_lines<R>(reader: R) -> impl Stream<Item = std::io::Result<Value>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut lines = BufReader::new(reader).split(b'\n');
        loop {
            match lines.next_segment().await {
                Ok(Some(raw)) => {
                    let Ok(line) = std::str::from_utf8(&raw) else {
                        warn!(bytes = raw.len(), "skipping non-UTF-8 JSONL line");
                        continue;
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(value) => yield Ok(value),
                        Err(e) => warn!(line = trimmed, error = %e, "skipping malformed JSONL line"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

/// Next stderr line, decoded lossily. `None` once the pipe is closed or
/// unreadable.
async fn next_stderr_line(lines: &mut Option<Split<BufReader<ChildStderr>>>) -> Option<String> {
    match lines {
        Some(lines) => match lines.next_segment().await {
            Ok(Some(raw)) => {
                let line = String::from_utf8_lossy(&raw);
                Some(line.trim_end_matches('\r').to_string())
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "stopped reading backend stderr");
                None
            }
        },
        None => std::future::pending().await,
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    debug!(line = %line, "backend stderr");
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Stop the child: SIGTERM first, then kill if it lingers.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a child we spawned and have not yet reaped.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret == 0 {
                if let Ok(Ok(status)) = tokio::time::timeout(TERM_GRACE, child.wait()).await {
                    debug!(%status, "backend exited after SIGTERM");
                    return;
                }
            } else {
                warn!(pid, "SIGTERM failed, proceeding to kill");
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "failed to kill backend (already exited?)");
    }
}

/// String field lookup used by every translator.
pub(crate) fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

/// Unsigned field lookup used by every translator.
pub(crate) fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Truncate long text for heartbeat descriptions.
pub(crate) fn brief(text: &str) -> String {
    const LIMIT: usize = 60;
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= LIMIT {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(LIMIT).collect();
        format!("{cut}...")
    }
}
