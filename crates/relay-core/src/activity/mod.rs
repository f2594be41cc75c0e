//! Activity items reported by engines, and their aggregation into the
//! canonical [`Activity`] snapshot.

mod aggregator;

pub use aggregator::{ActivityAggregator, ActivityError};

use serde::{Deserialize, Serialize};

/// What kind of side effect an [`ActivityItem`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    FileChange,
    Command,
    FileRead,
    McpCall,
    /// Response-shaping output; never reflected in [`Activity`].
    Message,
}

/// One event reported by an engine while it works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub kind: ItemKind,
    /// Path, command line, `server/tool` identifier, or message text.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActivityItem {
    pub fn new(kind: ItemKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn file_change(path: impl Into<String>) -> Self {
        Self::new(ItemKind::FileChange, path)
    }

    pub fn command(command: impl Into<String>) -> Self {
        Self::new(ItemKind::Command, command)
    }

    pub fn file_read(path: impl Into<String>) -> Self {
        Self::new(ItemKind::FileRead, path)
    }

    pub fn mcp_call(server: &str, tool: &str) -> Self {
        Self::new(ItemKind::McpCall, format!("{server}/{tool}"))
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new(ItemKind::Message, text)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Frozen record of the side effects observed during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub files_changed: Vec<String>,
    pub commands_run: Vec<String>,
    pub files_read: Vec<String>,
    pub mcp_calls: Vec<String>,
    pub heartbeat_count: u64,
}

impl Activity {
    /// An empty snapshot carrying only a heartbeat count.
    pub fn with_heartbeats(heartbeat_count: u64) -> Self {
        Self {
            heartbeat_count,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files_changed.is_empty()
            && self.commands_run.is_empty()
            && self.files_read.is_empty()
            && self.mcp_calls.is_empty()
    }
}
