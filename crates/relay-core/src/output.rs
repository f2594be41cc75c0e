//! The two canonical result documents and their emission.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::activity::Activity;
use crate::config::Backend;
use crate::engine::Metadata;

/// Response text when a completed run produced none.
pub const EMPTY_RESPONSE: &str = "(no response)";

/// Response text when a run was interrupted before its deadline.
pub const INTERRUPTED_RESPONSE: &str = "(interrupted; partial results only)";

/// Response text when the deadline cut a run short.
pub fn timeout_placeholder(timeout_secs: u64) -> String {
    format!("(timed out after {timeout_secs}s; partial results only)")
}

/// Machine-readable failure class of an [`ErrorOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgs,
    MissingApiKey,
    SdkError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessOutput {
    pub success: bool,
    pub engine: String,
    pub response: String,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub activity: Activity,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub engine: String,
    pub error: String,
    pub code: ErrorCode,
    pub duration_ms: u64,
    pub activity: Activity,
}

/// One run's result. Exactly one is written per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    Success(SuccessOutput),
    Error(ErrorOutput),
}

impl Output {
    /// A run that finished before its deadline. Empty text becomes
    /// [`EMPTY_RESPONSE`].
    pub fn completed(
        engine: Backend,
        response: impl Into<String>,
        duration_ms: u64,
        activity: Activity,
        metadata: Metadata,
    ) -> Self {
        let mut response = response.into();
        if response.trim().is_empty() {
            response = EMPTY_RESPONSE.to_string();
        }
        Output::Success(SuccessOutput {
            success: true,
            engine: engine.to_string(),
            response,
            timed_out: false,
            duration_ms,
            activity,
            metadata,
        })
    }

    /// A cancelled run. `response` is a placeholder, never partial text.
    pub fn timed_out(
        engine: Backend,
        response: impl Into<String>,
        duration_ms: u64,
        activity: Activity,
        metadata: Metadata,
    ) -> Self {
        Output::Success(SuccessOutput {
            success: true,
            engine: engine.to_string(),
            response: response.into(),
            timed_out: true,
            duration_ms,
            activity,
            metadata,
        })
    }

    pub fn failure(
        engine: impl Into<String>,
        code: ErrorCode,
        error: impl Into<String>,
        duration_ms: u64,
        activity: Activity,
    ) -> Self {
        Output::Error(ErrorOutput {
            success: false,
            engine: engine.into(),
            error: error.into(),
            code,
            duration_ms,
            activity,
        })
    }

    /// A failure detected before any engine ran.
    pub fn rejected(engine: impl Into<String>, code: ErrorCode, error: impl Into<String>) -> Self {
        Self::failure(engine, code, error, 0, Activity::default())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Output::Success(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn activity(&self) -> &Activity {
        match self {
            Output::Success(s) => &s.activity,
            Output::Error(e) => &e.activity,
        }
    }

    /// Write the document as pretty JSON plus a trailing newline.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Write the document and return the process exit code. A failed write
    /// is logged and reported as exit code 1.
    pub fn emit<W: Write + ?Sized>(&self, writer: &mut W) -> i32 {
        match self.write_to(writer) {
            Ok(()) => self.exit_code(),
            Err(e) => {
                error!(error = %e, "failed to write result document");
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TokenUsage;
    use serde_json::json;

    fn sample_activity() -> Activity {
        Activity {
            files_changed: vec!["src/lib.rs".into()],
            commands_run: vec!["cargo fmt".into(), "cargo fmt".into()],
            files_read: vec!["README.md".into()],
            mcp_calls: vec!["docs/search".into()],
            heartbeat_count: 4,
        }
    }

    #[test]
    fn success_document_shape() {
        let mut metadata = Metadata {
            session_id: Some("s-1".into()),
            cost_usd: Some(0.0123),
            model: Some("sonnet".into()),
            ..Metadata::default()
        };
        metadata.add_tokens(TokenUsage { input: 10, output: 5, reasoning: 0 });
        let output = Output::completed(Backend::Claude, "done", 1500, sample_activity(), metadata);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value,
            json!({
                "success": true,
                "engine": "claude",
                "response": "done",
                "timed_out": false,
                "duration_ms": 1500,
                "activity": {
                    "files_changed": ["src/lib.rs"],
                    "commands_run": ["cargo fmt", "cargo fmt"],
                    "files_read": ["README.md"],
                    "mcp_calls": ["docs/search"],
                    "heartbeat_count": 4
                },
                "metadata": {
                    "session_id": "s-1",
                    "cost_usd": 0.0123,
                    "tokens": {"input": 10, "output": 5, "reasoning": 0},
                    "model": "sonnet"
                }
            })
        );
        assert_eq!(output.exit_code(), 0);
    }

    #[test]
    fn error_document_shape() {
        let output = Output::failure(
            "codex",
            ErrorCode::SdkError,
            "backend reported an error: boom",
            42,
            Activity::with_heartbeats(1),
        );
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["code"], json!("SDK_ERROR"));
        assert_eq!(value["activity"]["heartbeat_count"], json!(1));
        assert!(value.get("metadata").is_none());
        assert_eq!(output.exit_code(), 1);
    }

    #[test]
    fn error_codes_are_screaming_snake_case() {
        assert_eq!(serde_json::to_value(ErrorCode::InvalidArgs).unwrap(), json!("INVALID_ARGS"));
        assert_eq!(
            serde_json::to_value(ErrorCode::MissingApiKey).unwrap(),
            json!("MISSING_API_KEY")
        );
    }

    #[test]
    fn documents_survive_a_json_round_trip() {
        let mut metadata = Metadata {
            cost_usd: Some(0.1 + 0.2),
            turns: Some(7),
            ..Metadata::default()
        };
        metadata.extra.insert("stop_reason".into(), json!("max_turns"));
        let outputs = [
            Output::timed_out(
                Backend::Gemini,
                timeout_placeholder(30),
                30_001,
                sample_activity(),
                metadata,
            ),
            Output::rejected("claude", ErrorCode::MissingApiKey, "no key"),
        ];
        for output in outputs {
            let text = serde_json::to_string(&output).unwrap();
            let back: Output = serde_json::from_str(&text).unwrap();
            assert_eq!(back, output);
            assert_eq!(serde_json::to_string(&back).unwrap(), text);
        }
    }

    #[test]
    fn blank_response_uses_placeholder() {
        let output = Output::completed(Backend::Codex, "  \n", 5, Activity::default(), Metadata::default());
        match output {
            Output::Success(s) => assert_eq!(s.response, EMPTY_RESPONSE),
            Output::Error(_) => panic!("expected success"),
        }
    }

    #[test]
    fn write_to_emits_one_document_and_newline() {
        let output = Output::rejected("gemini", ErrorCode::InvalidArgs, "empty prompt");
        let mut buf = Vec::new();
        assert_eq!(output.emit(&mut buf), 1);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with("}\n"));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["duration_ms"], json!(0));
    }

    #[test]
    fn failed_write_exits_nonzero() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let output = Output::completed(Backend::Claude, "ok", 1, Activity::default(), Metadata::default());
        assert_eq!(output.emit(&mut Broken), 1);
    }

    #[test]
    fn timeout_placeholder_names_the_deadline() {
        assert_eq!(timeout_placeholder(900), "(timed out after 900s; partial results only)");
    }
}
