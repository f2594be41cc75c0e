//! Shared test utilities for relay integration tests.
//!
//! - [`ScriptedEngine`]: an [`Engine`] that plays back a fixed list of
//!   steps, so orchestrator behaviour can be tested in virtual time.
//! - [`MemorySink`]: a clonable in-memory diagnostic channel.
//! - [`write_script`] / [`jsonl_script`]: fake backend executables for the
//!   subprocess engines.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use relay_core::{
    ActivityItem, Backend, Diagnostics, Engine, EngineCallbacks, EngineError, EngineResult,
    Metadata, RunConfig,
};

/// One action of a [`ScriptedEngine`].
#[derive(Debug, Clone)]
pub enum Step {
    Heartbeat(String),
    Item(ActivityItem),
    /// Sleep, waking early if the run is cancelled.
    Sleep(Duration),
    /// Sleep without looking at the cancel signal.
    Block(Duration),
    /// Park until the run is cancelled.
    WaitForCancel,
    Respond(String),
    Fail(String),
    Panic(String),
}

/// What a [`ScriptedEngine`] does once it observes cancellation.
#[derive(Debug, Clone)]
pub enum OnCancel {
    /// Return `EngineError::Cancelled`.
    Cancelled,
    /// Return an unrelated-looking backend error.
    Error(String),
    /// Return a best-effort result with this text.
    Respond(String),
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    backend: Backend,
    steps: Vec<Step>,
    on_cancel: OnCancel,
    metadata: Metadata,
}

impl ScriptedEngine {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            steps: Vec::new(),
            on_cancel: OnCancel::Cancelled,
            metadata: Metadata::default(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn heartbeat(self, description: &str) -> Self {
        self.step(Step::Heartbeat(description.to_string()))
    }

    pub fn item(self, item: ActivityItem) -> Self {
        self.step(Step::Item(item))
    }

    pub fn sleep(self, secs: u64) -> Self {
        self.step(Step::Sleep(Duration::from_secs(secs)))
    }

    pub fn block(self, secs: u64) -> Self {
        self.step(Step::Block(Duration::from_secs(secs)))
    }

    pub fn wait_for_cancel(self) -> Self {
        self.step(Step::WaitForCancel)
    }

    pub fn respond(self, text: &str) -> Self {
        self.step(Step::Respond(text.to_string()))
    }

    pub fn fail(self, message: &str) -> Self {
        self.step(Step::Fail(message.to_string()))
    }

    pub fn panic(self, message: &str) -> Self {
        self.step(Step::Panic(message.to_string()))
    }

    pub fn on_cancel(mut self, behaviour: OnCancel) -> Self {
        self.on_cancel = behaviour;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    fn result(&self, response: &str, items: Vec<ActivityItem>) -> EngineResult {
        EngineResult {
            response: response.to_string(),
            items,
            metadata: self.metadata.clone(),
        }
    }

    fn cancelled(&self, items: Vec<ActivityItem>) -> Result<EngineResult, EngineError> {
        match &self.on_cancel {
            OnCancel::Cancelled => Err(EngineError::Cancelled),
            OnCancel::Error(message) => Err(EngineError::Backend(message.clone())),
            OnCancel::Respond(text) => Ok(self.result(text, items)),
        }
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn run(
        &self,
        config: &RunConfig,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<EngineResult, EngineError> {
        let mut items = Vec::new();
        for step in &self.steps {
            match step {
                Step::Heartbeat(description) => callbacks.on_heartbeat(description),
                Step::Item(item) => {
                    items.push(item.clone());
                    callbacks.on_item(item.clone());
                }
                Step::Sleep(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(*duration) => {}
                        _ = config.cancel.cancelled() => return self.cancelled(items),
                    }
                }
                Step::Block(duration) => tokio::time::sleep(*duration).await,
                Step::WaitForCancel => {
                    config.cancel.cancelled().await;
                    return self.cancelled(items);
                }
                Step::Respond(text) => return Ok(self.result(text, items)),
                Step::Fail(message) => return Err(EngineError::Backend(message.clone())),
                Step::Panic(message) => panic!("{message}"),
            }
        }
        Ok(self.result("", items))
    }
}

/// In-memory diagnostic channel. Clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A diagnostic channel writing into this sink.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(Box::new(self.clone()))
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    pub fn heartbeat_lines(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with("[heartbeat] "))
            .collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A run config for `backend` rooted in the system temp directory.
pub fn run_config(backend: Backend, prompt: &str) -> RunConfig {
    RunConfig::new(backend, prompt, std::env::temp_dir())
}

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write fake backend");
    let mut perms = fs::metadata(&path)
        .expect("failed to stat fake backend")
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("failed to chmod fake backend");
    path
}

/// A fake backend that prints `events` as JSONL, then exits with `code`.
pub fn jsonl_script(dir: &Path, name: &str, events: &[Value], code: i32) -> PathBuf {
    let lines: Vec<String> = events.iter().map(Value::to_string).collect();
    let body = format!(
        "cat <<'RELAY_EVENTS'\n{}\nRELAY_EVENTS\nexit {code}",
        lines.join("\n")
    );
    write_script(dir, name, &body)
}
