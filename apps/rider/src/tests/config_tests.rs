use super::*;

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_root(label: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    env::temp_dir().join(format!("rider_config_{label}_{suffix}"))
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("sqlite:rides.db"),
        "sqlite://rides.db"
    );
}

#[test]
fn keeps_windows_absolute_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("sqlite:C:\\Users\\alice\\rider.db"),
        "sqlite:C:/Users/alice/rider.db"
    );
    assert_eq!(
        normalize_database_url("C:\\Users\\alice\\rider.db"),
        "sqlite:C:/Users/alice/rider.db"
    );
    assert_eq!(
        normalize_database_url("sqlite://C:/Users/alice/rider.db"),
        "sqlite:C:/Users/alice/rider.db"
    );
}

#[test]
fn creates_parent_dir_for_sqlite_file() {
    let root = temp_root("parent");
    let db_path = root.join("data").join("rider.db");

    let url = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(url.starts_with("sqlite://"));
    assert!(root.join("data").exists());

    fs::remove_dir_all(root).expect("cleanup");
}

#[test]
fn file_values_override_defaults() {
    let table: Table = r#"
server_url = "https://rides.example.com"
user_id = "rider-77"
search_timeout_secs = 120
terminal_display_secs = "0"
assumed_distance_miles = 3.5
"#
    .parse()
    .expect("toml");

    let mut settings = Settings::default();
    apply_file(&mut settings, &table);
    assert_eq!(settings.server_url, "https://rides.example.com");
    assert_eq!(settings.user_id, "rider-77");
    assert_eq!(settings.search_timeout_secs, 120);
    assert_eq!(settings.assumed_distance_miles, 3.5);

    let lifecycle = settings.lifecycle();
    assert_eq!(lifecycle.search_timeout, Some(Duration::from_secs(120)));
    assert_eq!(lifecycle.terminal_display, None);
    assert_eq!(lifecycle.stale_after, Duration::from_secs(3600));
}

#[test]
fn app_prefixed_env_wins_over_plain_env() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "sqlite://plain.db"),
        ("APP__DATABASE_URL", "sqlite://app.db"),
        ("RIDER_TOKEN", "plain-token"),
        ("APP__SEARCH_TIMEOUT_SECS", "45"),
        ("APP__STALE_AFTER_MINUTES", "not-a-number"),
    ]);

    let mut settings = Settings::default();
    apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));
    assert_eq!(settings.database_url, "sqlite://app.db");
    assert_eq!(settings.token.as_deref(), Some("plain-token"));
    assert_eq!(settings.search_timeout_secs, 45);
    assert_eq!(settings.stale_after_minutes, 60);
    assert_eq!(settings.http().token.as_deref(), Some("plain-token"));
}

#[test]
fn explicit_config_path_must_exist() {
    let missing = temp_root("missing").join("rider.toml");
    assert!(load_settings(Some(missing.as_path())).is_err());
}

#[test]
fn loads_explicit_config_file() {
    let root = temp_root("file");
    fs::create_dir_all(&root).expect("root");
    let path = root.join("rider.toml");
    fs::write(&path, "session_key = \"phone-1\"\nreconnect_attempts = 3\n").expect("write");

    let settings = load_settings(Some(path.as_path())).expect("settings");
    assert_eq!(settings.session_key, "phone-1");
    assert_eq!(settings.reconnect().max_attempts, 3);

    fs::remove_dir_all(root).expect("cleanup");
}

#[test]
fn malformed_config_file_is_an_error() {
    let root = temp_root("broken");
    fs::create_dir_all(&root).expect("root");
    let path = root.join("rider.toml");
    fs::write(&path, "server_url = ").expect("write");

    assert!(load_settings(Some(path.as_path())).is_err());

    fs::remove_dir_all(root).expect("cleanup");
}

#[test]
fn every_file_setting_can_come_from_the_environment() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("APP__WS_PATH", "/socket"),
        ("APP__RECONNECT_BASE_MS", "250"),
        ("APP__RECONNECT_ATTEMPTS", "8"),
        ("APP__ASSUMED_DISTANCE_MILES", "7.5"),
    ]);

    let mut settings = Settings::default();
    apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));
    assert_eq!(settings.ws_path, "/socket");
    assert_eq!(settings.assumed_distance_miles, 7.5);
    let reconnect = settings.reconnect();
    assert_eq!(reconnect.base_delay, Duration::from_millis(250));
    assert_eq!(reconnect.max_attempts, 8);
}

#[test]
fn oversized_durations_are_capped() {
    let settings = Settings {
        search_timeout_secs: u64::MAX,
        terminal_display_secs: u64::MAX / 2,
        stale_after_minutes: u64::MAX,
        ..Settings::default()
    };

    let lifecycle = settings.lifecycle();
    assert_eq!(
        lifecycle.search_timeout,
        Some(Duration::from_secs(MAX_TIMER_SECS))
    );
    assert_eq!(
        lifecycle.terminal_display,
        Some(Duration::from_secs(MAX_TIMER_SECS))
    );
    assert_eq!(lifecycle.stale_after, Duration::from_secs(u64::MAX));
}
