// tests/config_load.rs
use std::{env, fs};

use teaser_slot_engine::config::engine::{ENV_CONFIG_PATH, ENV_ENDPOINT};
use teaser_slot_engine::EngineConfig;

#[test]
fn explicit_paths_parse_toml_and_json() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("engine.toml");
    fs::write(
        &p_toml,
        r#"
[serving]
endpoint = "https://serve.example/etc"
retry_backoff_ms = 150

[memory]
long_term_capacity = 40
"#,
    )
    .unwrap();
    let cfg = EngineConfig::load_from_file(&p_toml).unwrap();
    assert_eq!(cfg.serving.retry_backoff_ms, 150);
    assert_eq!(cfg.memory.long_term_capacity, 40);
    assert_eq!(cfg.memory.cookie_name, "ta_seen");

    // JSON content behind a misleading extension still loads
    let p_json = dir.path().join("engine.conf");
    fs::write(&p_json, r#"{"visibility": {"threshold": 0.75}}"#).unwrap();
    let cfg = EngineConfig::load_from_file(&p_json).unwrap();
    assert_eq!(cfg.visibility.threshold, 0.75);

    let p_bad = dir.path().join("broken.toml");
    fs::write(&p_bad, "serving = [").unwrap();
    assert!(EngineConfig::load_from_file(&p_bad).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // isolate CWD so the repo's own config/ is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_ENDPOINT);

    // 1) nothing on disk: built-in defaults
    let cfg = EngineConfig::load_default().unwrap();
    assert_eq!(cfg.serving.max_attempts, 2);
    assert_eq!(cfg.feed.breakpoints.len(), 4);

    // 2) JSON fallback in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("engine.json"),
        r#"{"feed": {"max_rows": 12}}"#,
    )
    .unwrap();
    assert_eq!(EngineConfig::load_default().unwrap().feed.max_rows, 12);

    // 3) TOML wins over JSON
    fs::write(cfg_dir.join("engine.toml"), "[feed]\nmax_rows = 20\n").unwrap();
    assert_eq!(EngineConfig::load_default().unwrap().feed.max_rows, 20);

    // 4) env path wins over both
    let p_env = tmp.path().join("custom.toml");
    fs::write(&p_env, "[feed]\nmax_rows = 30\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    assert_eq!(EngineConfig::load_default().unwrap().feed.max_rows, 30);

    // 5) env path pointing nowhere is an error, not a silent fallback
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(EngineConfig::load_default().is_err());
    env::remove_var(ENV_CONFIG_PATH);

    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn endpoint_env_overrides_file() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("engine.toml");
    fs::write(&p, "[serving]\nendpoint = \"http://from-file/etc\"\n").unwrap();

    env::set_var(ENV_ENDPOINT, "  https://from-env.example/etc ");
    let cfg = EngineConfig::load_from_file(&p).unwrap();
    assert_eq!(cfg.serving.endpoint, "https://from-env.example/etc");

    // blank value is ignored
    env::set_var(ENV_ENDPOINT, "   ");
    let cfg = EngineConfig::load_from_file(&p).unwrap();
    assert_eq!(cfg.serving.endpoint, "http://from-file/etc");
    env::remove_var(ENV_ENDPOINT);
}

#[test]
fn shipped_config_matches_defaults() {
    let cfg = EngineConfig::load_from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/engine.toml"))
        .unwrap();
    let def = EngineConfig::default();
    assert_eq!(cfg.serving.timeout_ms, def.serving.timeout_ms);
    assert_eq!(cfg.memory.long_term_capacity, def.memory.long_term_capacity);
    assert_eq!(cfg.feed.breakpoints, def.feed.breakpoints);
    assert_eq!(cfg.tracking.width_param, def.tracking.width_param);
}
