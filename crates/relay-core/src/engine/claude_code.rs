//! Claude Code engine.
//!
//! Runs `claude -p <prompt> --output-format stream-json --verbose` and
//! translates its JSONL stream into activity items and a final result.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::activity::ActivityItem;
use crate::config::{Backend, RunConfig};

use super::process::{self, CommandSpec, StreamTranslator, brief, str_field, u64_field};
use super::trait_def::{Engine, EngineCallbacks};
use super::types::{EngineError, EngineResult, Metadata, TokenUsage};

/// Engine for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Debug, Clone)]
pub struct ClaudeCodeEngine {
    /// Default path to the `claude` binary; the `binary` option overrides it.
    binary: String,
}

impl ClaudeCodeEngine {
    /// Create an engine that looks for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
        }
    }

    /// Create an engine with a custom binary path.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary: path.into(),
        }
    }

    fn command(&self, config: &RunConfig) -> Result<CommandSpec, EngineError> {
        let max_turns = config
            .option_u64("max_turns")
            .unwrap_or_else(|| u64::from(config.effort.max_turns()));

        let mut spec = CommandSpec::from_config(&self.binary, config)?
            .arg("-p")
            .args(["--output-format", "stream-json", "--verbose"])
            .arg("--max-turns")
            .arg(max_turns.to_string());
        if let Some(model) = &config.model {
            spec = spec.arg("--model").arg(model);
        }
        if let Some(system) = &config.system_prompt {
            spec = spec.arg("--append-system-prompt").arg(system);
        }
        // `--` keeps a prompt that starts with `-` from being read as flags.
        Ok(spec
            .args(config.option_str_list("args")?)
            .arg("--")
            .arg(&config.prompt))
    }
}

impl Default for ClaudeCodeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for ClaudeCodeEngine {
    fn backend(&self) -> Backend {
        Backend::Claude
    }

    async fn run(
        &self,
        config: &RunConfig,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<EngineResult, EngineError> {
        let spec = self.command(config)?;
        let mut stream = ClaudeStream::default();
        process::drive(&spec, &config.cancel, callbacks, &mut stream).await?;
        Ok(stream.into_result())
    }
}

// ---------------------------------------------------------------------------
// stream-json translation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClaudeStream {
    response: Option<String>,
    last_text: String,
    items: Vec<ActivityItem>,
    metadata: Metadata,
    complete: bool,
}

impl ClaudeStream {
    fn emit(&mut self, item: ActivityItem, callbacks: &dyn EngineCallbacks) {
        self.items.push(item.clone());
        callbacks.on_item(item);
    }

    fn into_result(self) -> EngineResult {
        EngineResult {
            response: self.response.unwrap_or(self.last_text),
            items: self.items,
            metadata: self.metadata,
        }
    }

    fn on_system(&mut self, v: &Value, callbacks: &dyn EngineCallbacks) {
        if str_field(v, "subtype") != Some("init") {
            return;
        }
        if let Some(id) = str_field(v, "session_id") {
            self.metadata.session_id = Some(id.to_string());
        }
        if let Some(model) = str_field(v, "model") {
            self.metadata.model = Some(model.to_string());
            callbacks.on_heartbeat(&format!("session started ({model})"));
        }
    }

    fn on_assistant(&mut self, v: &Value, callbacks: &dyn EngineCallbacks) {
        let Some(blocks) = v
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        else {
            return;
        };
        for block in blocks {
            match str_field(block, "type") {
                Some("text") => {
                    if let Some(text) = str_field(block, "text") {
                        callbacks.on_heartbeat(&format!("responding: {}", brief(text)));
                        self.last_text = text.to_string();
                        self.emit(ActivityItem::message(text), callbacks);
                    }
                }
                Some("tool_use") => {
                    let name = str_field(block, "name").unwrap_or("unknown");
                    let input = block.get("input").unwrap_or(&Value::Null);
                    callbacks.on_heartbeat(&format!("running {name}"));
                    if let Some(item) = classify_tool(name, input) {
                        self.emit(item, callbacks);
                    }
                }
                _ => {}
            }
        }
    }

    fn on_result(&mut self, v: &Value) -> Result<(), EngineError> {
        let subtype = str_field(v, "subtype").unwrap_or("success");
        let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false);

        if let Some(id) = str_field(v, "session_id") {
            self.metadata.session_id = Some(id.to_string());
        }
        if let Some(cost) = v.get("total_cost_usd").and_then(Value::as_f64) {
            self.metadata.cost_usd = Some(cost);
        }
        if let Some(turns) = v.get("num_turns").and_then(Value::as_u64) {
            self.metadata.turns = u32::try_from(turns).ok();
        }
        if let Some(usage) = v.get("usage") {
            self.metadata.add_tokens(TokenUsage {
                input: u64_field(usage, "input_tokens"),
                output: u64_field(usage, "output_tokens"),
                reasoning: 0,
            });
        }

        match subtype {
            // A spent turn budget is a normal way for a run to end.
            "error_max_turns" => {
                self.metadata
                    .extra
                    .insert("stop_reason".to_string(), Value::from("max_turns"));
            }
            "success" if !is_error => {}
            other => {
                let message = str_field(v, "result")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("run ended with {other}"));
                return Err(EngineError::Backend(message));
            }
        }

        if let Some(text) = str_field(v, "result") {
            self.response = Some(text.to_string());
        }
        self.complete = true;
        Ok(())
    }
}

impl StreamTranslator for ClaudeStream {
    fn translate(
        &mut self,
        event: &Value,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<(), EngineError> {
        match str_field(event, "type").unwrap_or("") {
            "system" => self.on_system(event, callbacks),
            "assistant" => self.on_assistant(event, callbacks),
            "result" => self.on_result(event)?,
            "error" => {
                let message = event
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .or_else(|| str_field(event, "message"))
                    .unwrap_or("unknown error");
                return Err(EngineError::Backend(message.to_string()));
            }
            // Tool results come back as user turns; nothing to record.
            "user" => {}
            other => debug!(event_type = other, "ignoring unrecognised stream-json event type"),
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Map a Claude Code tool invocation to the activity it represents.
fn classify_tool(name: &str, input: &Value) -> Option<ActivityItem> {
    if let Some(rest) = name.strip_prefix("mcp__") {
        let (server, tool) = rest.split_once("__").unwrap_or((rest, ""));
        return Some(ActivityItem::mcp_call(server, tool));
    }
    match name {
        "Edit" | "Write" | "MultiEdit" => {
            str_field(input, "file_path").map(|p| ActivityItem::file_change(p).with_detail(name))
        }
        "NotebookEdit" => str_field(input, "notebook_path")
            .map(|p| ActivityItem::file_change(p).with_detail(name)),
        "Read" => str_field(input, "file_path").map(ActivityItem::file_read),
        "Bash" => str_field(input, "command").map(|c| {
            let item = ActivityItem::command(c);
            match str_field(input, "description") {
                Some(d) => item.with_detail(d),
                None => item,
            }
        }),
        _ => None,
    }
}
