//! The `Engine` trait -- the adapter interface for agent backends.
//!
//! Each concrete engine (Claude Code, Codex, Gemini) implements this trait.
//! The trait is intentionally object-safe so it can be stored as
//! `Box<dyn Engine>` in the [`super::EngineRegistry`].

use async_trait::async_trait;

use crate::activity::ActivityItem;
use crate::config::{Backend, RunConfig};

use super::types::{EngineError, EngineResult};

/// The two hooks an engine reports progress through.
///
/// Both may be called any number of times, in any order.
pub trait EngineCallbacks: Send + Sync {
    /// Short description of what the engine is doing right now. The most
    /// recent one is repeated on every heartbeat line.
    fn on_heartbeat(&self, description: &str);

    /// A side effect (or message) the engine observed.
    fn on_item(&self, item: ActivityItem);
}

/// Adapter interface for one agent backend.
///
/// # Cancellation
///
/// Implementations must watch `config.cancel` and, once it is set, stop as
/// soon as it is safe to: either return a best-effort [`EngineResult`] or
/// return [`EngineError::Cancelled`]. Either is reported as a timeout.
///
/// # Errors
///
/// Backend-native stopping conditions (a turn budget being reached) are
/// normal completions. Only genuine failures -- a process that cannot be
/// started, a malformed stream, an error reported by the backend -- are
/// errors.
#[async_trait]
pub trait Engine: Send + Sync {
    /// The backend this engine serves; its registry key.
    fn backend(&self) -> Backend;

    /// Execute one run to completion.
    async fn run(
        &self,
        config: &RunConfig,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<EngineResult, EngineError>;
}

// Compile-time assertion: Engine must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Engine) {}
};
