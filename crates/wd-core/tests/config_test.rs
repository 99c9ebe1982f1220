use wd_core::config::{Config, ConfigError};

#[test]
fn default_config() {
    let cfg = Config::default();
    assert!(cfg.daemons.is_empty());
    assert_eq!(cfg.governor.restart_base_ms, 1_000);
    assert_eq!(cfg.governor.restart_ceiling_ms, 300_000);
    assert_eq!(cfg.coordinator.quorum, 1);
    assert_eq!(cfg.coordinator.max_consecutive_errors, 5);
    assert_eq!(cfg.admission.allowed_roles, vec!["GPT", "GHOST"]);
    assert_eq!(cfg.api.port, 9876);
    assert_eq!(cfg.api.host, "127.0.0.1");
    assert!(cfg.signals.enabled);
    assert!(!cfg.logging.json);
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("restart_base_ms"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.api.port, cfg.api.port);
    assert_eq!(parsed.sentinel.ring_capacity, cfg.sentinel.ring_capacity);
    parsed.validate().expect("config validates");
}

#[test]
fn daemons_parse_from_toml() {
    let text = r#"
[coordinator]
quorum = 2

[[daemons]]
name = "db"
priority = 1
exec = { program = "/usr/bin/dbd", args = ["--foreground"] }

[[daemons]]
name = "relay"
dependencies = ["db"]
max_restart_attempts = 5
startup_timeout_ms = 2500
exec = { program = "/usr/bin/relay", match_pattern = "relay --serve" }
"#;
    let cfg = Config::from_toml(text).expect("parse daemons");
    assert_eq!(cfg.coordinator.quorum, 2);
    assert_eq!(cfg.daemons.len(), 2);

    let db = &cfg.daemons[0];
    assert_eq!(db.priority, 1);
    assert_eq!(db.exec.args, vec!["--foreground"]);
    assert_eq!(db.max_restart_attempts, 3);

    let relay = &cfg.daemons[1];
    assert!(relay.dependencies.contains("db"));
    assert_eq!(relay.max_restart_attempts, 5);
    assert_eq!(relay.startup_timeout().as_millis(), 2500);
    assert_eq!(relay.match_pattern(), "relay --serve");
}

#[test]
fn ceiling_below_base_fails_validation() {
    let mut cfg = Config::default();
    cfg.governor.restart_base_ms = 10_000;
    cfg.governor.restart_ceiling_ms = 5_000;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("restart_ceiling_ms"));
}

#[test]
fn empty_allow_list_fails_validation() {
    let mut cfg = Config::default();
    cfg.admission.allowed_roles = vec![" ".to_string()];
    assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn zero_interval_fails_validation() {
    let mut cfg = Config::default();
    cfg.sentinel.interval_ms = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("sentinel.interval_ms"));
}

#[test]
fn malformed_toml_is_parse_error() {
    let err = Config::from_toml("[governor\ntick_ms = 1").expect_err("should not parse");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from(dir.path().join("nope.toml")).expect_err("missing file");
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn expand_path_leaves_absolute_paths_alone() {
    assert_eq!(
        Config::expand_path("/var/log/warden.log"),
        std::path::PathBuf::from("/var/log/warden.log")
    );
    assert!(!Config::expand_path("~/x").starts_with("~"));
}

#[test]
fn relative_paths_resolve_under_state_dir() {
    let cfg = Config::from_toml(
        r#"
        [general]
        state_dir = "/srv/warden"

        [watchdog]
        log_path = "/var/log/watchdog.log"
        "#,
    )
    .unwrap();
    assert_eq!(
        cfg.resolve(&cfg.sentinel.log_path),
        std::path::PathBuf::from("/srv/warden/logs/sentinel.log")
    );
    assert_eq!(
        cfg.resolve(&cfg.coordinator.patch_dir),
        std::path::PathBuf::from("/srv/warden/patches")
    );
    assert_eq!(
        cfg.resolve(&cfg.watchdog.log_path),
        std::path::PathBuf::from("/var/log/watchdog.log")
    );
}
