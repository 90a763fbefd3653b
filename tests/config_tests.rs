use std::io::Write;

use recollect::config;

const FULL: &str = r#"{
    "databasePath": "/var/lib/recollect/recollect.db",
    "imageDir": "/var/lib/recollect/images",
    "enabledGroups": [100, 200],
    "allowTagByName": false,
    "allowBindCommand": false,
    "randomRecall": [
        { "groupId": 100, "poolSize": 50 },
        { "groupId": 200, "poolSize": 120 }
    ],
    "cacheSize": 1024
}"#;

#[test]
fn full_config_parses() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(FULL.as_bytes()).expect("write");

    let cfg = config::load(file.path()).expect("load");
    assert_eq!(cfg.database_path, "/var/lib/recollect/recollect.db");
    assert_eq!(cfg.enabled_groups, vec![100, 200]);
    assert!(!cfg.allow_tag_by_name);
    assert!(!cfg.allow_bind_command);
    assert_eq!(cfg.random_recall.len(), 2);
    assert_eq!(cfg.random_recall[1].group_id, 200);
    assert_eq!(cfg.random_recall[1].pool_size, 120);
    assert_eq!(cfg.cache_size, 1024);
}

#[test]
fn optional_fields_take_defaults() {
    let cfg: config::Config = serde_json::from_str(
        r#"{ "databasePath": "recollect.db", "imageDir": "images" }"#,
    )
    .expect("minimal config");
    assert!(cfg.enabled_groups.is_empty());
    assert!(cfg.allow_tag_by_name);
    assert!(cfg.allow_bind_command);
    assert!(cfg.random_recall.is_empty());
    assert_eq!(cfg.cache_size, 4096);
}

#[test]
fn missing_file_is_an_io_error() {
    let err = config::load(std::path::Path::new("/nonexistent/recollect.json"))
        .expect_err("missing file");
    assert!(matches!(err, recollect::error::ConfigError::Io(_)));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(b"{ not json").expect("write");
    let err = config::load(file.path()).expect_err("bad json");
    assert!(matches!(err, recollect::error::ConfigError::Parse(_)));
}
