//! Instance identity and the projected registry entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::StatusVal;

/// Agent platform an instance runs on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Claude Code.
    #[default]
    Claude,
    /// Gemini CLI.
    Gemini,
    /// Codex CLI.
    Codex,
    /// Anything participating from outside a supported platform.
    External,
}

impl Tool {
    /// Storage string for the tool.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::External => "external",
        }
    }

    /// Parse a tool string, defaulting unknown values to `External`.
    #[must_use]
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "claude" => Self::Claude,
            "gemini" => Self::Gemini,
            "codex" => Self::Codex,
            _ => Self::External,
        }
    }
}

/// A logical agent identity as projected from the log.
///
/// Status lives here only as a cache of the projection — the log is the
/// source of truth, and two readers of the same prefix must agree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    /// Base name, unique while the instance is alive.
    pub name: String,
    /// Display tag; full name is `tag-name`.
    pub tag: Option<String>,
    /// Agent platform.
    pub tool: Tool,
    /// Latest projected status.
    pub status: StatusVal,
    /// Context tag of the latest status event.
    pub status_context: String,
    /// Detail of the latest status event.
    pub status_detail: Option<String>,
    /// Timestamp of the latest status/life event.
    pub status_time: DateTime<Utc>,
    /// Parent instance for subagents.
    pub parent_name: Option<String>,
    /// Working directory.
    pub directory: Option<String>,
    /// Platform session identifier.
    pub session_id: Option<String>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Terminal flag: set by `life:stopped`, never cleared for this
    /// incarnation of the name.
    pub stopped: bool,
}

impl Instance {
    /// Full display name: `tag-name` when a tag is set, else the base name.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.tag {
            Some(tag) if !tag.is_empty() => format!("{tag}-{}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Whether the instance participates in delivery (registered, not
    /// stopped).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.stopped
    }
}
