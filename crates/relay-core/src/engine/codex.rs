//! Codex CLI engine.
//!
//! Runs `codex exec --json` and translates its thread/turn/item event
//! stream. A run is complete once a turn completes; `turn.failed` and
//! top-level `error` events are backend failures.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::activity::ActivityItem;
use crate::config::{Backend, RunConfig};

use super::process::{self, CommandSpec, StreamTranslator, brief, str_field, u64_field};
use super::trait_def::{Engine, EngineCallbacks};
use super::types::{EngineError, EngineResult, Metadata, TokenUsage};

#[derive(Debug, Clone)]
pub struct CodexEngine {
    binary: String,
}

impl CodexEngine {
    pub fn new() -> Self {
        Self {
            binary: "codex".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary: path.into(),
        }
    }

    fn command(&self, config: &RunConfig) -> Result<CommandSpec, EngineError> {
        let mut spec = CommandSpec::from_config(&self.binary, config)?
            .args(["exec", "--json", "--skip-git-repo-check"])
            .arg("-C")
            .arg(config.working_dir.to_string_lossy())
            .arg("-c")
            .arg(format!("model_reasoning_effort=\"{}\"", config.effort));
        if let Some(model) = &config.model {
            spec = spec.arg("-m").arg(model);
        }
        Ok(spec
            .args(config.option_str_list("args")?)
            .arg("--")
            .arg(config.prompt_with_system()))
    }
}

impl Default for CodexEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for CodexEngine {
    fn backend(&self) -> Backend {
        Backend::Codex
    }

    async fn run(
        &self,
        config: &RunConfig,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<EngineResult, EngineError> {
        let spec = self.command(config)?;
        let mut stream = CodexStream::default();
        process::drive(&spec, &config.cancel, callbacks, &mut stream).await?;
        Ok(stream.into_result())
    }
}

#[derive(Debug, Default)]
struct CodexStream {
    response: String,
    items: Vec<ActivityItem>,
    metadata: Metadata,
    turns: u32,
    complete: bool,
}

impl CodexStream {
    fn emit(&mut self, item: ActivityItem, callbacks: &dyn EngineCallbacks) {
        self.items.push(item.clone());
        callbacks.on_item(item);
    }

    fn into_result(mut self) -> EngineResult {
        if self.turns > 0 {
            self.metadata.turns = Some(self.turns);
        }
        EngineResult {
            response: self.response,
            items: self.items,
            metadata: self.metadata,
        }
    }

    fn on_item_started(&mut self, item: &Value, callbacks: &dyn EngineCallbacks) {
        match str_field(item, "type").unwrap_or("") {
            "command_execution" => {
                let command = str_field(item, "command").unwrap_or("command");
                callbacks.on_heartbeat(&format!("running {}", brief(command)));
            }
            "file_change" => callbacks.on_heartbeat("editing files"),
            "mcp_tool_call" => {
                let server = str_field(item, "server").unwrap_or("mcp");
                let tool = str_field(item, "tool").unwrap_or("tool");
                callbacks.on_heartbeat(&format!("calling {server}/{tool}"));
            }
            _ => {}
        }
    }

    fn on_item_completed(&mut self, item: &Value, callbacks: &dyn EngineCallbacks) {
        match str_field(item, "type").unwrap_or("") {
            "agent_message" => {
                if let Some(text) = str_field(item, "text") {
                    callbacks.on_heartbeat(&format!("responding: {}", brief(text)));
                    self.response = text.to_string();
                    self.emit(ActivityItem::message(text), callbacks);
                }
            }
            "reasoning" => callbacks.on_heartbeat("reasoning"),
            "command_execution" => {
                if let Some(command) = str_field(item, "command") {
                    let mut activity = ActivityItem::command(command);
                    if let Some(code) = item.get("exit_code").and_then(Value::as_i64) {
                        activity = activity.with_detail(format!("exit {code}"));
                    }
                    self.emit(activity, callbacks);
                }
            }
            "file_change" => {
                let changes = item
                    .get("changes")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for change in changes {
                    if let Some(path) = str_field(change, "path") {
                        let mut activity = ActivityItem::file_change(path);
                        if let Some(kind) = str_field(change, "kind") {
                            activity = activity.with_detail(kind);
                        }
                        self.emit(activity, callbacks);
                    }
                }
            }
            "mcp_tool_call" => {
                let server = str_field(item, "server").unwrap_or("unknown");
                let tool = str_field(item, "tool").unwrap_or("unknown");
                self.emit(ActivityItem::mcp_call(server, tool), callbacks);
            }
            // Non-fatal item-level errors are surfaced as warnings by codex.
            "error" => {
                debug!(detail = str_field(item, "message").unwrap_or(""), "codex item error");
            }
            other => debug!(item_type = other, "ignoring codex item"),
        }
    }
}

impl StreamTranslator for CodexStream {
    fn translate(
        &mut self,
        event: &Value,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<(), EngineError> {
        match str_field(event, "type").unwrap_or("") {
            "thread.started" => {
                if let Some(id) = str_field(event, "thread_id") {
                    self.metadata.session_id = Some(id.to_string());
                }
                callbacks.on_heartbeat("thread started");
            }
            "turn.started" => {
                self.turns += 1;
                callbacks.on_heartbeat(&format!("turn {} started", self.turns));
            }
            "item.started" | "item.updated" => {
                if let Some(item) = event.get("item") {
                    self.on_item_started(item, callbacks);
                }
            }
            "item.completed" => {
                if let Some(item) = event.get("item") {
                    self.on_item_completed(item, callbacks);
                }
            }
            "turn.completed" => {
                if let Some(usage) = event.get("usage") {
                    self.metadata.add_tokens(TokenUsage {
                        input: u64_field(usage, "input_tokens"),
                        output: u64_field(usage, "output_tokens"),
                        reasoning: u64_field(usage, "reasoning_output_tokens"),
                    });
                }
                self.complete = true;
            }
            "turn.failed" => {
                let message = event
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .unwrap_or("turn failed");
                return Err(EngineError::Backend(message.to_string()));
            }
            "error" => {
                let message = str_field(event, "message").unwrap_or("unknown error");
                return Err(EngineError::Backend(message.to_string()));
            }
            other => debug!(event_type = other, "ignoring unrecognised codex event type"),
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ItemKind;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<String>>,
        items: Mutex<Vec<ActivityItem>>,
    }

    impl EngineCallbacks for Recorder {
        fn on_heartbeat(&self, description: &str) {
            self.statuses.lock().unwrap().push(description.to_string());
        }

        fn on_item(&self, item: ActivityItem) {
            self.items.lock().unwrap().push(item);
        }
    }

    fn feed_all(stream: &mut CodexStream, rec: &Recorder, events: &[Value]) {
        for event in events {
            stream.translate(event, rec).unwrap();
        }
    }

    #[test]
    fn full_turn_produces_activity_and_result() {
        let mut stream = CodexStream::default();
        let rec = Recorder::default();
        feed_all(
            &mut stream,
            &rec,
            &[
                json!({"type": "thread.started", "thread_id": "th-9"}),
                json!({"type": "turn.started"}),
                json!({"type": "item.started", "item": {"id": "1", "type": "command_execution", "command": "bash -lc ls", "status": "in_progress"}}),
                json!({"type": "item.completed", "item": {"id": "1", "type": "command_execution", "command": "bash -lc ls", "exit_code": 0, "status": "completed"}}),
                json!({"type": "item.completed", "item": {"id": "2", "type": "file_change", "changes": [{"path": "src/main.rs", "kind": "update"}, {"path": "README.md", "kind": "add"}]}}),
                json!({"type": "item.completed", "item": {"id": "3", "type": "mcp_tool_call", "server": "docs", "tool": "search"}}),
                json!({"type": "item.completed", "item": {"id": "4", "type": "agent_message", "text": "All done."}}),
                json!({"type": "turn.completed", "usage": {"input_tokens": 1200, "cached_input_tokens": 300, "output_tokens": 80, "reasoning_output_tokens": 40}}),
            ],
        );

        assert!(stream.is_complete());
        let kinds: Vec<ItemKind> = rec.items.lock().unwrap().iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ItemKind::Command,
                ItemKind::FileChange,
                ItemKind::FileChange,
                ItemKind::McpCall,
                ItemKind::Message
            ]
        );
        assert!(
            rec.statuses
                .lock()
                .unwrap()
                .contains(&"running bash -lc ls".to_string())
        );

        let result = stream.into_result();
        assert_eq!(result.response, "All done.");
        assert_eq!(result.metadata.session_id.as_deref(), Some("th-9"));
        assert_eq!(result.metadata.turns, Some(1));
        assert_eq!(
            result.metadata.tokens,
            Some(TokenUsage { input: 1200, output: 80, reasoning: 40 })
        );
        assert_eq!(result.items[0].detail.as_deref(), Some("exit 0"));
    }

    #[test]
    fn turn_failed_is_a_backend_error() {
        let mut stream = CodexStream::default();
        let rec = Recorder::default();
        let err = stream
            .translate(
                &json!({"type": "turn.failed", "error": {"message": "stream disconnected"}}),
                &rec,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(ref m) if m == "stream disconnected"));
    }

    #[test]
    fn top_level_error_is_a_backend_error() {
        let mut stream = CodexStream::default();
        let rec = Recorder::default();
        let err = stream
            .translate(&json!({"type": "error", "message": "401 Unauthorized"}), &rec)
            .unwrap_err();
        assert!(err.to_string().contains("401 Unauthorized"));
    }

    #[test]
    fn item_errors_are_not_fatal() {
        let mut stream = CodexStream::default();
        let rec = Recorder::default();
        stream
            .translate(
                &json!({"type": "item.completed", "item": {"type": "error", "message": "truncated output"}}),
                &rec,
            )
            .unwrap();
        assert!(rec.items.lock().unwrap().is_empty());
    }

    #[test]
    fn command_line_passes_effort_model_and_prompt_last() {
        let mut config = RunConfig::new(Backend::Codex, "refactor", std::env::temp_dir());
        config.model = Some("gpt-5-codex".to_string());
        config.system_prompt = Some("Stay in scope.".to_string());
        let spec = CodexEngine::new().command(&config).unwrap();
        assert_eq!(spec.binary, "codex");
        assert_eq!(&spec.args[..3], ["exec", "--json", "--skip-git-repo-check"]);
        let joined = spec.args.join(" ");
        assert!(joined.contains("model_reasoning_effort=\"medium\""));
        assert!(joined.contains("-m gpt-5-codex"));
        assert_eq!(
            &spec.args[spec.args.len() - 2..],
            ["--", "Stay in scope.\n\nrefactor"]
        );
    }
}
