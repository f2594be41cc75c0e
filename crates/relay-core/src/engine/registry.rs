//! Engine registry -- the set of available adapters, keyed by [`Backend`].
//!
//! Lookup is by enum key only; there is no string-based dispatch.

use std::collections::HashMap;

use crate::config::Backend;

use super::trait_def::Engine;
use super::{ClaudeCodeEngine, CodexEngine, GeminiEngine};

#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<Backend, Box<dyn Engine>>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled subprocess adapters for every backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ClaudeCodeEngine::new());
        registry.register(CodexEngine::new());
        registry.register(GeminiEngine::new());
        registry
    }

    /// Register an engine under [`Engine::backend`]. Returns the engine it
    /// replaced, if any.
    pub fn register(&mut self, engine: impl Engine + 'static) -> Option<Box<dyn Engine>> {
        self.engines.insert(engine.backend(), Box::new(engine))
    }

    pub fn get(&self, backend: Backend) -> Option<&dyn Engine> {
        self.engines.get(&backend).map(|b| b.as_ref())
    }

    /// Registered backends in declaration order.
    pub fn backends(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.engines.keys().copied().collect();
        backends.sort();
        backends
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.backends())
            .finish()
    }
}
