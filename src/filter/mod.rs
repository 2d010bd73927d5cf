//! Filter/query engine: typed filter expressions compiled against the
//! flattened event view, plus the separate target-name matcher for
//! message addressing.

pub mod expr;
pub mod pattern;
pub mod target;

pub use expr::{validate_raw, Field, Filter, Group};
pub use pattern::{escape_like, sql_quote, Pattern};
pub use target::{any_target_matches, target_matches};
