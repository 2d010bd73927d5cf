use hcom::{AppError, GlobalConfig};

#[test]
fn defaults_are_complete() {
    let config = GlobalConfig::default();
    assert_eq!(config.ipc_name, "hcom-daemon");
    assert_eq!(config.poll_interval_ms, 200);
    assert_eq!(config.append_retries, 5);
    assert_eq!(config.collision_window_seconds, 20);
    assert_eq!(config.staleness.listening_seconds, 35);
    assert_eq!(config.staleness.active_seconds, 300);
    assert_eq!(config.wait.default_timeout_seconds, 60);
    assert!(config
        .delivery
        .file_write_contexts
        .contains(&"tool:Edit".to_owned()));
    assert!(config.db_path().ends_with("hcom.db"));
}

#[test]
fn parses_full_toml() {
    let toml = r#"
data_dir = "/tmp/hcom-test"
ipc_name = "hcom-test"
poll_interval_ms = 50
append_retries = 3
collision_window_seconds = 10

[staleness]
listening_seconds = 20
active_seconds = 120

[delivery]
file_write_contexts = ["tool:Write"]

[wait]
default_timeout_seconds = 5
"#;
    let config = GlobalConfig::from_toml_str(toml).expect("config parses");
    assert_eq!(config.ipc_name, "hcom-test");
    assert_eq!(config.poll_interval_ms, 50);
    assert_eq!(config.collision_window_seconds, 10);
    assert_eq!(config.staleness.listening_seconds, 20);
    assert_eq!(config.delivery.file_write_contexts, vec!["tool:Write"]);
    assert_eq!(config.wait.default_timeout_seconds, 5);
}

#[test]
fn empty_toml_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config parses");
    assert_eq!(config, GlobalConfig::default());
}

#[test]
fn rejects_zero_poll_interval() {
    let err = GlobalConfig::from_toml_str("poll_interval_ms = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_zero_append_retries() {
    let err = GlobalConfig::from_toml_str("append_retries = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_zero_collision_window() {
    let err = GlobalConfig::from_toml_str("collision_window_seconds = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_or_default_without_file_succeeds() {
    let config = GlobalConfig::load_or_default(None).expect("defaults load");
    assert_eq!(config.append_retries, 5);
}

#[test]
fn load_or_default_with_missing_explicit_path_fails() {
    let err = GlobalConfig::load_or_default(Some(std::path::Path::new(
        "/nonexistent/hcom-config.toml",
    )))
    .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}
