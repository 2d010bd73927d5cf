//! Target-name matching for `@name` message addressing.
//!
//! Distinct from generic filtering: a target matches an instance whose base
//! name equals the target, whose full name (`tag-name`) equals the target,
//! or whose tag equals the target (the trailing `-` separator is implied).
//! Matching is whole-segment only — `@luna` addresses `luna` and
//! `team-luna`, but an underscore directly after the base name blocks the
//! match, so `luna_reviewer_1` (a subagent of luna) and `lunatic` (a
//! different agent) are never addressed.

/// Whether a mention target addresses the instance `(name, tag)`.
#[must_use]
pub fn target_matches(target: &str, name: &str, tag: Option<&str>) -> bool {
    if target.is_empty() {
        return false;
    }
    if name == target {
        return true;
    }
    if let Some(tag) = tag {
        if !tag.is_empty() {
            if tag == target {
                return true;
            }
            if format!("{tag}-{name}") == target {
                return true;
            }
        }
    }
    false
}

/// Whether any of the mention targets addresses the instance.
#[must_use]
pub fn any_target_matches(targets: &[String], name: &str, tag: Option<&str>) -> bool {
    targets.iter().any(|t| target_matches(t, name, tag))
}
