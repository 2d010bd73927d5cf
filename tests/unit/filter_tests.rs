use hcom::filter::{validate_raw, Filter, Pattern};
use hcom::AppError;

// ── Pattern parsing ─────────────────────────────────────

#[test]
fn sigils_select_the_operator() {
    assert_eq!(
        Pattern::parse("^foo").expect("parses"),
        Pattern::Prefix("foo".into())
    );
    assert_eq!(
        Pattern::parse("$foo").expect("parses"),
        Pattern::Suffix("foo".into())
    );
    assert_eq!(
        Pattern::parse("=foo").expect("parses"),
        Pattern::Exact("foo".into())
    );
    assert_eq!(
        Pattern::parse("src/*.rs").expect("parses"),
        Pattern::Glob("src/*.rs".into())
    );
    assert_eq!(
        Pattern::parse("foo").expect("parses"),
        Pattern::Substring("foo".into())
    );
}

#[test]
fn invalid_glob_is_rejected() {
    let err = Pattern::parse("src/[*.rs").unwrap_err();
    assert!(matches!(err, AppError::Filter(_)));
}

#[test]
fn conditions_render_with_escaping() {
    let pattern = Pattern::parse("=o'neil").expect("parses");
    assert_eq!(pattern.sql_condition("instance"), "instance = 'o''neil'");

    let pattern = Pattern::parse("50%_done").expect("parses");
    assert_eq!(
        pattern.sql_condition("msg_text"),
        "msg_text LIKE '%50\\%\\_done%' ESCAPE '\\'"
    );

    let pattern = Pattern::parse("^tool:").expect("parses");
    assert_eq!(
        pattern.sql_condition("status_context"),
        "status_context LIKE 'tool:%' ESCAPE '\\'"
    );
}

#[test]
fn array_fields_always_use_containment() {
    let pattern = Pattern::parse("=nova").expect("parses");
    assert_eq!(
        pattern.sql_containment("msg_mentions"),
        "msg_mentions LIKE '%nova%' ESCAPE '\\'"
    );
}

// ── Structured filters ──────────────────────────────────

#[test]
fn empty_filter_matches_everything() {
    assert_eq!(Filter::new().compile().expect("compiles"), "1=1");
}

#[test]
fn repeated_key_is_or_distinct_keys_are_and() {
    let mut filter = Filter::new();
    filter
        .push("agent", "=a")
        .expect("push")
        .push("agent", "=b")
        .expect("push")
        .push("status", "=listening")
        .expect("push");
    let sql = filter.compile().expect("compiles");
    assert_eq!(
        sql,
        "(instance = 'a' OR instance = 'b') AND status_val = 'listening'"
    );
}

#[test]
fn idle_shortcut_expands_to_primitives() {
    let mut filter = Filter::new();
    filter.idle("nova").expect("expands");
    assert_eq!(
        filter.compile().expect("compiles"),
        "instance = 'nova' AND status_val = 'listening'"
    );
}

#[test]
fn blocked_shortcut_expands_to_primitives() {
    let mut filter = Filter::new();
    filter.blocked("nova").expect("expands");
    assert_eq!(
        filter.compile().expect("compiles"),
        "instance = 'nova' AND status_val = 'blocked'"
    );
}

#[test]
fn unknown_key_is_rejected_before_storage() {
    let mut filter = Filter::new();
    let err = filter.push("nope", "x").unwrap_err();
    assert!(matches!(err, AppError::Filter(_)));
}

#[test]
fn key_aliases_resolve() {
    let mut filter = Filter::new();
    filter
        .push("mentions", "nova")
        .expect("push")
        .push("delivered_to", "veki")
        .expect("push");
    let sql = filter.compile().expect("compiles");
    assert!(sql.contains("msg_mentions LIKE '%nova%'"));
    assert!(sql.contains("msg_delivered_to LIKE '%veki%'"));
}

// ── Raw escape hatch ────────────────────────────────────

#[test]
fn raw_expression_is_anded_with_structured_groups() {
    let mut filter = Filter::new();
    filter.push("type", "=status").expect("push");
    filter.raw("status_val = 'blocked' OR status_val = 'listening'");
    let sql = filter.compile().expect("compiles");
    assert_eq!(
        sql,
        "type = 'status' AND (status_val = 'blocked' OR status_val = 'listening')"
    );
}

#[test]
fn raw_expression_with_unknown_identifier_is_rejected() {
    let mut filter = Filter::new();
    filter.raw("password = 'hunter2'");
    let err = filter.compile().unwrap_err();
    assert!(err.to_string().contains("password"));
}

#[test]
fn raw_validation_rejects_injection_shapes() {
    assert!(validate_raw("1=1; DROP TABLE events").is_err());
    assert!(validate_raw("type = 'unterminated").is_err());
    assert!(validate_raw("type = 'x' -- comment").is_err());
    assert!(validate_raw("\"type\" = 'x'").is_err());
}

#[test]
fn raw_validation_accepts_allowed_shapes() {
    assert!(validate_raw("type = 'status' AND status_val IN ('active', 'blocked')").is_ok());
    assert!(validate_raw("msg_text LIKE '%done%' ESCAPE '\\'").is_ok());
    assert!(validate_raw("json_extract(data, '$.custom') IS NOT NULL").is_ok());
    // Identifier checks are not fooled by keywords inside string literals.
    assert!(validate_raw("msg_text = 'password'").is_ok());
}
