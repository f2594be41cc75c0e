//! Core of `relay`: run exactly one agent backend per invocation and turn
//! whatever it does into one of two canonical JSON result documents.
//!
//! ```text
//! RunConfig ──> Orchestrator ──arms──> deadline + Heartbeat + CancelSignal
//!                    │
//!                    └── Engine::run(config, callbacks)
//!                              │ on_heartbeat ──> Heartbeat
//!                              │ on_item      ──> ActivityAggregator
//!                              v
//!                   Completed | Cancelled | Failed ──> Output
//! ```

pub mod activity;
pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod heartbeat;
pub mod orchestrator;
pub mod output;

pub use activity::{Activity, ActivityAggregator, ActivityItem, ItemKind};
pub use cancel::{CancelReason, CancelSignal};
pub use config::{Backend, Effort, RunConfig};
pub use diagnostics::Diagnostics;
pub use engine::{Engine, EngineCallbacks, EngineError, EngineRegistry, EngineResult, Metadata};
pub use heartbeat::Heartbeat;
pub use orchestrator::Orchestrator;
pub use output::{ErrorCode, Output};
