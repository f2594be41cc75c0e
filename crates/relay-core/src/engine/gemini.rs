//! Gemini CLI engine.
//!
//! Runs `gemini -p <prompt> --output-format stream-json`. Assistant text
//! arrives as message deltas; the run ends with a `result` event carrying
//! token statistics.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::activity::ActivityItem;
use crate::config::{Backend, RunConfig};

use super::process::{self, CommandSpec, StreamTranslator, brief, str_field, u64_field};
use super::trait_def::{Engine, EngineCallbacks};
use super::types::{EngineError, EngineResult, Metadata, TokenUsage};

#[derive(Debug, Clone)]
pub struct GeminiEngine {
    binary: String,
}

impl GeminiEngine {
    pub fn new() -> Self {
        Self {
            binary: "gemini".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary: path.into(),
        }
    }

    fn command(&self, config: &RunConfig) -> Result<CommandSpec, EngineError> {
        let mut spec = CommandSpec::from_config(&self.binary, config)?
            .arg(format!("--prompt={}", config.prompt_with_system()))
            .args(["--output-format", "stream-json"]);
        if let Some(model) = &config.model {
            spec = spec.arg("-m").arg(model);
        }
        Ok(spec.args(config.option_str_list("args")?))
    }
}

impl Default for GeminiEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for GeminiEngine {
    fn backend(&self) -> Backend {
        Backend::Gemini
    }

    async fn run(
        &self,
        config: &RunConfig,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<EngineResult, EngineError> {
        let spec = self.command(config)?;
        let mut stream = GeminiStream::default();
        process::drive(&spec, &config.cancel, callbacks, &mut stream).await?;
        Ok(stream.into_result())
    }
}

#[derive(Debug, Default)]
struct GeminiStream {
    response: String,
    items: Vec<ActivityItem>,
    metadata: Metadata,
    complete: bool,
}

impl GeminiStream {
    fn emit(&mut self, item: ActivityItem, callbacks: &dyn EngineCallbacks) {
        self.items.push(item.clone());
        callbacks.on_item(item);
    }

    fn into_result(self) -> EngineResult {
        EngineResult {
            response: self.response,
            items: self.items,
            metadata: self.metadata,
        }
    }

    fn on_message(&mut self, v: &Value, callbacks: &dyn EngineCallbacks) {
        if str_field(v, "role") != Some("assistant") {
            return;
        }
        let Some(content) = str_field(v, "content") else {
            return;
        };
        let delta = v.get("delta").and_then(Value::as_bool).unwrap_or(false);
        if delta {
            self.response.push_str(content);
        } else {
            self.response = content.to_string();
            self.emit(ActivityItem::message(content), callbacks);
        }
        callbacks.on_heartbeat(&format!("responding: {}", brief(&self.response)));
    }

    fn on_result(&mut self, v: &Value) -> Result<(), EngineError> {
        if let Some(stats) = v.get("stats") {
            self.metadata.add_tokens(TokenUsage {
                input: u64_field(stats, "input_tokens"),
                output: u64_field(stats, "output_tokens"),
                reasoning: u64_field(stats, "thoughts_tokens"),
            });
            if let Some(calls) = stats.get("tool_calls").and_then(Value::as_u64) {
                self.metadata
                    .extra
                    .insert("tool_calls".to_string(), Value::from(calls));
            }
        }
        if str_field(v, "status") == Some("error") {
            let message = v
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .unwrap_or("run ended with error status");
            return Err(EngineError::Backend(message.to_string()));
        }
        self.complete = true;
        Ok(())
    }
}

impl StreamTranslator for GeminiStream {
    fn translate(
        &mut self,
        event: &Value,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<(), EngineError> {
        match str_field(event, "type").unwrap_or("") {
            "init" => {
                if let Some(id) = str_field(event, "session_id") {
                    self.metadata.session_id = Some(id.to_string());
                }
                if let Some(model) = str_field(event, "model") {
                    self.metadata.model = Some(model.to_string());
                }
                callbacks.on_heartbeat("session started");
            }
            "message" => self.on_message(event, callbacks),
            "tool_use" => {
                let name = str_field(event, "tool_name").unwrap_or("unknown");
                let params = event.get("parameters").unwrap_or(&Value::Null);
                callbacks.on_heartbeat(&format!("running {name}"));
                for item in classify_tool(name, params) {
                    self.emit(item, callbacks);
                }
            }
            "tool_result" => {
                if str_field(event, "status") == Some("error") {
                    debug!(tool_id = str_field(event, "tool_id").unwrap_or(""), "gemini tool failed");
                }
            }
            "error" => {
                let message = str_field(event, "message").unwrap_or("unknown error");
                if str_field(event, "severity") == Some("warning") {
                    warn!(detail = message, "gemini warning");
                } else {
                    return Err(EngineError::Backend(message.to_string()));
                }
            }
            "result" => self.on_result(event)?,
            other => debug!(event_type = other, "ignoring unrecognised gemini event type"),
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Map a Gemini CLI tool call to the activity it represents.
fn classify_tool(name: &str, params: &Value) -> Vec<ActivityItem> {
    let path = || str_field(params, "file_path").or_else(|| str_field(params, "absolute_path"));
    match name {
        "write_file" | "replace" => path()
            .map(|p| ActivityItem::file_change(p).with_detail(name))
            .into_iter()
            .collect(),
        "read_file" => path().map(ActivityItem::file_read).into_iter().collect(),
        "read_many_files" => params
            .get("paths")
            .and_then(Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ActivityItem::file_read)
                    .collect()
            })
            .unwrap_or_default(),
        "run_shell_command" => str_field(params, "command")
            .map(ActivityItem::command)
            .into_iter()
            .collect(),
        // MCP tools are exposed as `<server>__<tool>`.
        _ => match name.split_once("__") {
            Some((server, tool)) => vec![ActivityItem::mcp_call(server, tool)],
            None => Vec::new(),
        },
    }
}
