//! Event model: the immutable records of the append-only log.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::{AppError, Result};

/// Discriminant for the three event families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Agent-to-agent or operator message.
    Message,
    /// Activity/status change reported for an instance.
    Status,
    /// Instance lifecycle action.
    Life,
}

impl EventType {
    /// Storage string for the `type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Status => "status",
            Self::Life => "life",
        }
    }

    /// Parse the storage string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for unknown discriminants.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "message" => Ok(Self::Message),
            "status" => Ok(Self::Status),
            "life" => Ok(Self::Life),
            other => Err(AppError::Db(format!("invalid event type: {other}"))),
        }
    }
}

/// Message addressing scope.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Delivered to every live instance except the sender.
    #[default]
    Broadcast,
    /// Delivered only to instances matched by the mention tokens.
    Mentions,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    /// A registered agent instance.
    #[default]
    Instance,
    /// A human or tool outside the registry (e.g. the operator CLI).
    External,
    /// Generated by hcom itself (collision alerts, batch notices).
    System,
}

/// Optional conversational intent tag on a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Asks the recipient to do something.
    Request,
    /// Shares information, no action expected.
    Inform,
    /// Acknowledges a prior request.
    Ack,
}

/// Activity states an instance reports.
///
/// `Inactive` is a read-time projection applied by the registry when an
/// instance has gone silent past its staleness window; it is never written
/// to the log by a live instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusVal {
    /// Idle, ready to receive messages immediately.
    Listening,
    /// Mid-turn, executing tools.
    Active,
    /// Blocked on an approval gate or external wait.
    Blocked,
    /// Projected only: no recent events inside the staleness window.
    Inactive,
}

impl StatusVal {
    /// Storage string for the status value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Inactive => "inactive",
        }
    }

    /// Parse the storage string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for unknown values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "listening" => Ok(Self::Listening),
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "inactive" => Ok(Self::Inactive),
            other => Err(AppError::Db(format!("invalid status value: {other}"))),
        }
    }
}

/// Lifecycle actions recorded as `life` events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifeAction {
    /// Instance registered; establishes identity at `listening`.
    Created,
    /// First activity observed after launch.
    Ready,
    /// Instance terminated; terminal for registry computation.
    Stopped,
    /// A launcher started a batch of instances.
    BatchLaunched,
}

/// Payload of a `message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    /// Sender display name.
    pub from: String,
    /// Message body.
    pub text: String,
    /// Addressing scope.
    #[serde(default)]
    pub scope: Scope,
    /// Sender classification.
    #[serde(default)]
    pub sender_kind: SenderKind,
    /// Instances the message has been delivered to. Grows only.
    #[serde(default)]
    pub delivered_to: Vec<String>,
    /// Mention tokens parsed from the text.
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Conversational intent, if tagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Thread label, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Event id this message replies to. May dangle after archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
    /// Bundle attached to this message. May dangle after archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

/// Payload of a `status` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusPayload {
    /// Reported activity state.
    pub val: StatusVal,
    /// Free-form tag, e.g. `tool:Bash` or `deliver:nova`.
    #[serde(default)]
    pub context: String,
    /// Human-readable detail; for file-write contexts, the file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Payload of a `life` event.
///
/// `created` events carry the identity snapshot; `batch_launched` carries
/// the expected instance count for batch-readiness notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifePayload {
    /// Lifecycle action.
    pub action: LifeAction,
    /// Who performed the action (launcher name or operator).
    pub by: String,
    /// Launch batch this instance belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Why the action happened (mostly for `stopped`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Display tag; full name is `tag-name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Agent platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Parent instance for subagents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Platform session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Expected instance count on `batch_launched`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched: Option<u32>,
}

/// Type-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// `message` payload.
    Message(MessagePayload),
    /// `status` payload.
    Status(StatusPayload),
    /// `life` payload.
    Life(LifePayload),
}

impl EventPayload {
    /// Discriminant matching this payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Message(_) => EventType::Message,
            Self::Status(_) => EventType::Status,
            Self::Life(_) => EventType::Life,
        }
    }

    /// Serialize to the JSON stored in the `data` column.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let result = match self {
            Self::Message(p) => serde_json::to_string(p),
            Self::Status(p) => serde_json::to_string(p),
            Self::Life(p) => serde_json::to_string(p),
        };
        result.map_err(|err| AppError::Db(format!("serialize event payload: {err}")))
    }

    /// Deserialize from the `data` column given the `type` discriminant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the JSON does not match the event type.
    pub fn from_json(event_type: EventType, data: &str) -> Result<Self> {
        let parsed = match event_type {
            EventType::Message => serde_json::from_str(data).map(Self::Message),
            EventType::Status => serde_json::from_str(data).map(Self::Status),
            EventType::Life => serde_json::from_str(data).map(Self::Life),
        };
        parsed.map_err(|err| AppError::Db(format!("parse event payload: {err}")))
    }
}

/// An immutable record of the append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Monotonic id assigned at append. Never reused.
    pub id: i64,
    /// Append timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Origin instance name (or sender label for external messages).
    pub instance: String,
    /// Type-specific payload.
    pub payload: EventPayload,
}

impl Event {
    /// Discriminant of this event.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Message payload, if this is a message event.
    #[must_use]
    pub fn as_message(&self) -> Option<&MessagePayload> {
        match &self.payload {
            EventPayload::Message(p) => Some(p),
            _ => None,
        }
    }

    /// Status payload, if this is a status event.
    #[must_use]
    pub fn as_status(&self) -> Option<&StatusPayload> {
        match &self.payload {
            EventPayload::Status(p) => Some(p),
            _ => None,
        }
    }

    /// Life payload, if this is a life event.
    #[must_use]
    pub fn as_life(&self) -> Option<&LifePayload> {
        match &self.payload {
            EventPayload::Life(p) => Some(p),
            _ => None,
        }
    }

    /// Wire representation used by the CLI and daemon IPC.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if payload serialization fails.
    pub fn to_wire(&self) -> Result<serde_json::Value> {
        let data = match &self.payload {
            EventPayload::Message(p) => serde_json::to_value(p),
            EventPayload::Status(p) => serde_json::to_value(p),
            EventPayload::Life(p) => serde_json::to_value(p),
        }
        .map_err(|err| AppError::Db(format!("serialize event: {err}")))?;
        Ok(serde_json::json!({
            "id": self.id,
            "ts": self.timestamp.to_rfc3339(),
            "type": self.event_type().as_str(),
            "instance": self.instance,
            "data": data,
        }))
    }
}

/// A not-yet-appended event: everything but the store-assigned id and
/// timestamp.
#[derive(Debug, Clone)]
pub struct EventDraft {
    /// Origin instance name.
    pub instance: String,
    /// Type-specific payload.
    pub payload: EventPayload,
}

impl EventDraft {
    /// Draft a message event, parsing mention tokens from the text.
    ///
    /// Scope is `Mentions` when the text contains at least one `@name`
    /// token, `Broadcast` otherwise.
    #[must_use]
    pub fn message(from: impl Into<String>, text: impl Into<String>, sender_kind: SenderKind) -> Self {
        let from = from.into();
        let text = text.into();
        let mentions = parse_mentions(&text);
        let scope = if mentions.is_empty() {
            Scope::Broadcast
        } else {
            Scope::Mentions
        };
        Self {
            instance: from.clone(),
            payload: EventPayload::Message(MessagePayload {
                from,
                text,
                scope,
                sender_kind,
                delivered_to: Vec::new(),
                mentions,
                intent: None,
                thread: None,
                reply_to: None,
                bundle_id: None,
            }),
        }
    }

    /// Draft a status event.
    #[must_use]
    pub fn status(
        instance: impl Into<String>,
        val: StatusVal,
        context: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            instance: instance.into(),
            payload: EventPayload::Status(StatusPayload {
                val,
                context: context.into(),
                detail,
            }),
        }
    }

    /// Draft a life event.
    #[must_use]
    pub fn life(instance: impl Into<String>, payload: LifePayload) -> Self {
        Self {
            instance: instance.into(),
            payload: EventPayload::Life(payload),
        }
    }
}

/// Extract `@name` mention tokens from message text, in order, deduplicated.
#[must_use]
pub fn parse_mentions(text: &str) -> Vec<String> {
    static MENTION_RE: OnceLock<Regex> = OnceLock::new();
    let re = MENTION_RE.get_or_init(|| {
        #[allow(clippy::expect_used)] // pattern is a compile-time constant
        let re = Regex::new(r"@([A-Za-z0-9][A-Za-z0-9_-]*)").expect("valid mention regex");
        re
    });

    let mut seen = Vec::new();
    for capture in re.captures_iter(text) {
        if let Some(token) = capture.get(1) {
            let token = token.as_str().to_owned();
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
    }
    seen
}
