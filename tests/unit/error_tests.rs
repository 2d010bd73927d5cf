use hcom::AppError;

#[test]
fn display_includes_domain_prefix() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Db("bad".into()).to_string(), "db: bad");
    assert_eq!(AppError::Filter("bad".into()).to_string(), "filter: bad");
    assert_eq!(AppError::Ipc("bad".into()).to_string(), "ipc: bad");
    assert_eq!(
        AppError::NotFound("thing".into()).to_string(),
        "not found: thing"
    );
    assert_eq!(AppError::Io("bad".into()).to_string(), "io: bad");
}

#[test]
fn converts_sqlx_errors() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));
}

#[test]
fn converts_toml_errors() {
    let parse_err = toml::from_str::<toml::Value>("not [ valid").unwrap_err();
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn converts_io_errors() {
    let err: AppError = std::io::Error::other("boom").into();
    assert!(matches!(err, AppError::Io(_)));
}
