//! Typed filter expressions compiled to predicates over the flattened
//! event view.
//!
//! A filter is a conjunction of groups. Repeating the same key ORs values
//! within that key; distinct keys AND together:
//! `agent=a agent=b status=listening` means
//! `(instance matches a OR b) AND (status matches listening)`.
//!
//! An optional raw SQL escape hatch is ANDed with the structured groups
//! after being checked against the allow-listed identifier set. It is never
//! executed against storage unchecked.

use chrono::{DateTime, Utc};

use super::pattern::Pattern;
use crate::{AppError, Result};

/// Allow-listed queryable fields of the flattened event view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Event id.
    Id,
    /// Append timestamp.
    Timestamp,
    /// Event type discriminant.
    Type,
    /// Origin instance.
    Instance,
    /// Message sender.
    MsgFrom,
    /// Message body.
    MsgText,
    /// Message scope.
    MsgScope,
    /// Message sender kind.
    MsgSenderKind,
    /// Delivered-to array (containment only).
    MsgDeliveredTo,
    /// Mentions array (containment only).
    MsgMentions,
    /// Message intent.
    MsgIntent,
    /// Message thread.
    MsgThread,
    /// Reply-to event id.
    MsgReplyTo,
    /// Attached bundle id.
    MsgBundleId,
    /// Status value.
    StatusVal,
    /// Status context tag.
    StatusContext,
    /// Status detail.
    StatusDetail,
    /// Life action.
    LifeAction,
    /// Life actor.
    LifeBy,
    /// Life batch id.
    LifeBatchId,
    /// Life reason.
    LifeReason,
}

impl Field {
    /// Column name in the flattened view.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Timestamp => "timestamp",
            Self::Type => "type",
            Self::Instance => "instance",
            Self::MsgFrom => "msg_from",
            Self::MsgText => "msg_text",
            Self::MsgScope => "msg_scope",
            Self::MsgSenderKind => "msg_sender_kind",
            Self::MsgDeliveredTo => "msg_delivered_to",
            Self::MsgMentions => "msg_mentions",
            Self::MsgIntent => "msg_intent",
            Self::MsgThread => "msg_thread",
            Self::MsgReplyTo => "msg_reply_to",
            Self::MsgBundleId => "msg_bundle_id",
            Self::StatusVal => "status_val",
            Self::StatusContext => "status_context",
            Self::StatusDetail => "status_detail",
            Self::LifeAction => "life_action",
            Self::LifeBy => "life_by",
            Self::LifeBatchId => "life_batch_id",
            Self::LifeReason => "life_reason",
        }
    }

    /// Whether the field holds a JSON array matched by containment.
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::MsgDeliveredTo | Self::MsgMentions)
    }

    /// Resolve a user-facing key (with aliases) to a field.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` for unknown keys.
    pub fn parse(key: &str) -> Result<Self> {
        let field = match key {
            "id" => Self::Id,
            "timestamp" | "ts" => Self::Timestamp,
            "type" => Self::Type,
            "instance" | "agent" => Self::Instance,
            "from" | "msg_from" => Self::MsgFrom,
            "text" | "msg_text" => Self::MsgText,
            "scope" | "msg_scope" => Self::MsgScope,
            "sender" | "sender_kind" | "msg_sender_kind" => Self::MsgSenderKind,
            "delivered_to" | "msg_delivered_to" => Self::MsgDeliveredTo,
            "mentions" | "msg_mentions" => Self::MsgMentions,
            "intent" | "msg_intent" => Self::MsgIntent,
            "thread" | "msg_thread" => Self::MsgThread,
            "reply_to" | "msg_reply_to" => Self::MsgReplyTo,
            "bundle" | "bundle_id" | "msg_bundle_id" => Self::MsgBundleId,
            "status" | "status_val" => Self::StatusVal,
            "context" | "status_context" => Self::StatusContext,
            "detail" | "status_detail" => Self::StatusDetail,
            "action" | "life_action" => Self::LifeAction,
            "by" | "life_by" => Self::LifeBy,
            "batch" | "batch_id" | "life_batch_id" => Self::LifeBatchId,
            "reason" | "life_reason" => Self::LifeReason,
            other => {
                return Err(AppError::Filter(format!("unknown filter key: {other}")));
            }
        };
        Ok(field)
    }
}

/// Every column identifier a raw expression may reference.
const RAW_ALLOWED_COLUMNS: &[&str] = &[
    "id",
    "timestamp",
    "type",
    "instance",
    "data",
    "msg_from",
    "msg_text",
    "msg_scope",
    "msg_sender_kind",
    "msg_delivered_to",
    "msg_mentions",
    "msg_intent",
    "msg_thread",
    "msg_reply_to",
    "msg_bundle_id",
    "status_val",
    "status_context",
    "status_detail",
    "life_action",
    "life_by",
    "life_batch_id",
    "life_reason",
];

/// SQL keywords and benign functions permitted inside raw expressions.
const RAW_ALLOWED_WORDS: &[&str] = &[
    "and", "or", "not", "like", "glob", "in", "is", "null", "between", "escape", "true", "false",
    "abs", "lower", "upper", "length", "coalesce", "strftime", "json_extract",
];

/// One filter group: a field with one or more OR-ed value patterns.
#[derive(Debug, Clone)]
pub struct Group {
    /// Field matched by this group.
    pub field: Field,
    /// OR-ed value patterns.
    pub patterns: Vec<Pattern>,
}

/// A complete filter: AND of groups, optional time range, optional raw
/// escape hatch.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    groups: Vec<Group>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    raw: Option<String>,
}

impl Filter {
    /// An empty filter matching every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no condition has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.since.is_none() && self.until.is_none() && self.raw.is_none()
    }

    /// Add a key/value condition. Repeating a key ORs the value into the
    /// existing group for that key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` for unknown keys or invalid patterns.
    pub fn push(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        let field = Field::parse(key)?;
        let pattern = Pattern::parse(value)?;
        if let Some(group) = self.groups.iter_mut().find(|g| g.field == field) {
            group.patterns.push(pattern);
        } else {
            self.groups.push(Group {
                field,
                patterns: vec![pattern],
            });
        }
        Ok(self)
    }

    /// Restrict to events at or after the given time.
    pub fn since(&mut self, ts: DateTime<Utc>) -> &mut Self {
        self.since = Some(ts);
        self
    }

    /// Restrict to events at or before the given time.
    pub fn until(&mut self, ts: DateTime<Utc>) -> &mut Self {
        self.until = Some(ts);
        self
    }

    /// Attach a raw SQL predicate, ANDed with the structured groups.
    /// Validated at compile time, not here.
    pub fn raw(&mut self, expr: impl Into<String>) -> &mut Self {
        self.raw = Some(expr.into());
        self
    }

    /// Shortcut: `--idle NAME` expands to `agent=NAME AND status=listening`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` if the name is not a valid pattern.
    pub fn idle(&mut self, name: &str) -> Result<&mut Self> {
        self.push("agent", &format!("={name}"))?;
        self.push("status", "=listening")?;
        Ok(self)
    }

    /// Shortcut: `--blocked NAME` expands to `agent=NAME AND status=blocked`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` if the name is not a valid pattern.
    pub fn blocked(&mut self, name: &str) -> Result<&mut Self> {
        self.push("agent", &format!("={name}"))?;
        self.push("status", "=blocked")?;
        Ok(self)
    }

    /// Compile to a self-contained SQL predicate over the flattened view.
    ///
    /// The rendered string has no placeholders, so it can be persisted with
    /// a subscription and re-evaluated verbatim.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` if the raw escape hatch references a
    /// non-allow-listed identifier. Nothing is executed on failure.
    pub fn compile(&self) -> Result<String> {
        let mut conjuncts: Vec<String> = Vec::new();

        for group in &self.groups {
            let alternatives: Vec<String> = group
                .patterns
                .iter()
                .map(|p| {
                    if group.field.is_array() {
                        p.sql_containment(group.field.column())
                    } else {
                        p.sql_condition(group.field.column())
                    }
                })
                .collect();
            if alternatives.len() == 1 {
                conjuncts.push(alternatives.into_iter().collect());
            } else {
                conjuncts.push(format!("({})", alternatives.join(" OR ")));
            }
        }

        if let Some(since) = self.since {
            conjuncts.push(format!("timestamp >= '{}'", since.to_rfc3339()));
        }
        if let Some(until) = self.until {
            conjuncts.push(format!("timestamp <= '{}'", until.to_rfc3339()));
        }

        if let Some(raw) = &self.raw {
            validate_raw(raw)?;
            conjuncts.push(format!("({raw})"));
        }

        if conjuncts.is_empty() {
            return Ok("1=1".to_owned());
        }
        Ok(conjuncts.join(" AND "))
    }
}

/// Check a raw expression against the allow-listed identifier set.
///
/// The expression is tokenized with string literals removed; every
/// identifier token must be an allow-listed column, keyword, or function.
///
/// # Errors
///
/// Returns `AppError::Filter` naming the offending token.
pub fn validate_raw(expr: &str) -> Result<()> {
    if expr.contains(';') {
        return Err(AppError::Filter("raw expression must not contain ';'".into()));
    }

    let stripped = strip_string_literals(expr)?;
    if stripped.contains('"') || stripped.contains('`') {
        return Err(AppError::Filter(
            "raw expression must use single-quoted strings".into(),
        ));
    }
    if stripped.contains("--") || stripped.contains("/*") {
        return Err(AppError::Filter(
            "raw expression must not contain comments".into(),
        ));
    }

    let mut token = String::new();
    let mut check = |token: &mut String| -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        let lowered = token.to_lowercase();
        token.clear();
        if lowered.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            // Numeric literal, fine.
            return Ok(());
        }
        if RAW_ALLOWED_COLUMNS.contains(&lowered.as_str())
            || RAW_ALLOWED_WORDS.contains(&lowered.as_str())
        {
            return Ok(());
        }
        Err(AppError::Filter(format!(
            "raw expression references disallowed identifier: {lowered}"
        )))
    };

    for ch in stripped.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
            token.push(ch);
        } else {
            check(&mut token)?;
        }
    }
    check(&mut token)?;
    Ok(())
}

/// Remove single-quoted string literals (with `''` escapes), leaving the
/// structural text for identifier checking.
fn strip_string_literals(expr: &str) -> Result<String> {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\'' {
            out.push(ch);
            continue;
        }
        // Inside a literal; consume to the closing quote, honoring ''.
        loop {
            match chars.next() {
                Some('\'') => {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                    } else {
                        break;
                    }
                }
                Some(_) => {}
                None => {
                    return Err(AppError::Filter(
                        "raw expression has an unterminated string literal".into(),
                    ));
                }
            }
        }
        out.push(' ');
    }
    Ok(out)
}
