use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Activity, ActivityItem, ItemKind};

#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("activity has already been finalized")]
    AlreadyFinalized,
}

/// Insertion-ordered set: first occurrence wins.
#[derive(Debug, Default)]
struct OrderedSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl OrderedSet {
    fn insert(&mut self, value: String) -> bool {
        if self.seen.contains(&value) {
            return false;
        }
        self.seen.insert(value.clone());
        self.order.push(value);
        true
    }
}

#[derive(Debug, Default)]
struct State {
    files_changed: OrderedSet,
    files_read: OrderedSet,
    commands_run: Vec<String>,
    mcp_calls: Vec<String>,
    finalized: bool,
    dropped: u64,
}

/// Folds [`ActivityItem`]s into an [`Activity`] snapshot.
///
/// File paths are deduplicated, commands and MCP calls keep every
/// occurrence, messages are ignored. After [`finalize`](Self::finalize)
/// every further item is dropped.
#[derive(Debug, Default)]
pub struct ActivityAggregator {
    state: Mutex<State>,
}

impl ActivityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one item. Returns `true` if the snapshot changed.
    pub fn record(&self, item: ActivityItem) -> bool {
        let mut state = self.state();
        if state.finalized {
            state.dropped += 1;
            tracing::debug!(kind = ?item.kind, "dropping activity item reported after finalize");
            return false;
        }
        match item.kind {
            ItemKind::FileChange => state.files_changed.insert(item.summary),
            ItemKind::FileRead => state.files_read.insert(item.summary),
            ItemKind::Command => {
                state.commands_run.push(item.summary);
                true
            }
            ItemKind::McpCall => {
                state.mcp_calls.push(item.summary);
                true
            }
            ItemKind::Message => false,
        }
    }

    /// Freeze the aggregate. May be called once.
    pub fn finalize(&self, heartbeat_count: u64) -> Result<Activity, ActivityError> {
        let mut state = self.state();
        if state.finalized {
            return Err(ActivityError::AlreadyFinalized);
        }
        state.finalized = true;
        Ok(Activity {
            files_changed: std::mem::take(&mut state.files_changed.order),
            commands_run: std::mem::take(&mut state.commands_run),
            files_read: std::mem::take(&mut state.files_read.order),
            mcp_calls: std::mem::take(&mut state.mcp_calls),
            heartbeat_count,
        })
    }

    pub fn is_finalized(&self) -> bool {
        self.state().finalized
    }

    /// Items that arrived after finalization.
    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }
}
