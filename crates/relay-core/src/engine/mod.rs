//! Engine adapter interface for agent backends.
//!
//! This module defines the [`Engine`] trait every backend adapter
//! implements, the [`EngineCallbacks`] it reports through, the shared result
//! types, and the [`EngineRegistry`] keyed by [`Backend`](crate::Backend).
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     v
//! EngineRegistry --get(Backend::Claude)--> &dyn Engine
//!     |                                        |
//!     |   run(config, callbacks) --------------+
//!     |        |  on_heartbeat("running Bash")
//!     |        |  on_item(ActivityItem)
//!     |        v
//!     |   Result<EngineResult, EngineError>
//! ```
//!
//! The bundled adapters drive each vendor's CLI as a subprocess and
//! translate its JSONL event stream; see [`process`].

pub mod claude_code;
pub mod codex;
pub mod gemini;
pub mod process;
pub mod registry;
pub mod trait_def;
pub mod types;

pub use claude_code::ClaudeCodeEngine;
pub use codex::CodexEngine;
pub use gemini::GeminiEngine;
pub use registry::EngineRegistry;
pub use trait_def::{Engine, EngineCallbacks};
pub use types::{EngineError, EngineResult, Metadata, TokenUsage};
