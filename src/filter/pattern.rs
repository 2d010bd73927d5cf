//! String match patterns for filter values.
//!
//! A leading sigil selects the operator; everything else is a substring
//! match:
//!
//! | input      | meaning                         |
//! |------------|---------------------------------|
//! | `foo`      | substring containment           |
//! | `^foo`     | prefix                          |
//! | `$foo`     | suffix                          |
//! | `=foo`     | exact                           |
//! | `*foo/ba*` | glob (full-value match)         |

use crate::{AppError, Result};

/// A parsed value pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Contains the text anywhere.
    Substring(String),
    /// Starts with the text.
    Prefix(String),
    /// Ends with the text.
    Suffix(String),
    /// Equals the text.
    Exact(String),
    /// Matches the glob over the whole value.
    Glob(String),
}

impl Pattern {
    /// Parse a raw value into a pattern, validating glob syntax eagerly so
    /// bad filters are rejected before touching storage.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filter` for an invalid glob.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(rest) = raw.strip_prefix('^') {
            return Ok(Self::Prefix(rest.to_owned()));
        }
        if let Some(rest) = raw.strip_prefix('$') {
            return Ok(Self::Suffix(rest.to_owned()));
        }
        if let Some(rest) = raw.strip_prefix('=') {
            return Ok(Self::Exact(rest.to_owned()));
        }
        if raw.contains('*') {
            glob::Pattern::new(raw)
                .map_err(|err| AppError::Filter(format!("invalid glob '{raw}': {err}")))?;
            return Ok(Self::Glob(raw.to_owned()));
        }
        Ok(Self::Substring(raw.to_owned()))
    }

    /// The inner text of the pattern, for array-containment matching.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Substring(s) | Self::Prefix(s) | Self::Suffix(s) | Self::Exact(s)
            | Self::Glob(s) => s,
        }
    }

    /// Render a SQL condition over `column` with the value inlined.
    ///
    /// Values are escaped for both string quoting and `LIKE` wildcards, so
    /// the rendered predicate is self-contained and can be persisted with a
    /// subscription.
    #[must_use]
    pub fn sql_condition(&self, column: &str) -> String {
        match self {
            Self::Substring(s) => format!(
                "{column} LIKE '%{}%' ESCAPE '\\'",
                sql_quote(&escape_like(s))
            ),
            Self::Prefix(s) => format!(
                "{column} LIKE '{}%' ESCAPE '\\'",
                sql_quote(&escape_like(s))
            ),
            Self::Suffix(s) => format!(
                "{column} LIKE '%{}' ESCAPE '\\'",
                sql_quote(&escape_like(s))
            ),
            Self::Exact(s) => format!("{column} = '{}'", sql_quote(s)),
            Self::Glob(s) => format!("{column} GLOB '{}'", sql_quote(s)),
        }
    }

    /// Render a containment condition for array-valued columns.
    ///
    /// Arrays are stored as JSON text (`["a","b"]`), variable in size, so
    /// containment is a substring test on the serialized form — never
    /// equality.
    #[must_use]
    pub fn sql_containment(&self, column: &str) -> String {
        format!(
            "{column} LIKE '%{}%' ESCAPE '\\'",
            sql_quote(&escape_like(self.text()))
        )
    }
}

/// Double single quotes for safe SQL string literals.
#[must_use]
pub fn sql_quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// Escape `LIKE` wildcards so pattern text matches literally.
///
/// Backslash first, then the wildcards, matching the `ESCAPE '\'` clause in
/// the rendered conditions.
#[must_use]
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
