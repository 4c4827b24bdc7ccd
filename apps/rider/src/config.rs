use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::{HttpApiSettings, LifecycleSettings, ReconnectPolicy};
use toml::{Table, Value};

pub const DEFAULT_CONFIG_FILE: &str = "rider.toml";
/// Upper bound for the search timeout and terminal display delay.
pub const MAX_TIMER_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub ws_path: String,
    pub database_url: String,
    pub session_key: String,
    pub user_id: String,
    pub token: Option<String>,
    pub http_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub terminal_display_secs: u64,
    pub stale_after_minutes: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_attempts: u32,
    /// Trip length used for quotes when no routing service is available.
    pub assumed_distance_miles: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            ws_path: "/ws".into(),
            database_url: "sqlite://./data/rider.db".into(),
            session_key: "current_ride".into(),
            user_id: "guest-rider".into(),
            token: None,
            http_timeout_secs: 10,
            search_timeout_secs: 300,
            terminal_display_secs: 5,
            stale_after_minutes: 60,
            reconnect_base_ms: 1_000,
            reconnect_attempts: 5,
            assumed_distance_miles: 5.0,
        }
    }
}

impl Settings {
    pub fn lifecycle(&self) -> LifecycleSettings {
        LifecycleSettings {
            search_timeout: (self.search_timeout_secs > 0)
                .then(|| Duration::from_secs(self.search_timeout_secs.min(MAX_TIMER_SECS))),
            terminal_display: (self.terminal_display_secs > 0)
                .then(|| Duration::from_secs(self.terminal_display_secs.min(MAX_TIMER_SECS))),
            stale_after: Duration::from_secs(self.stale_after_minutes.saturating_mul(60)),
        }
    }

    pub fn http(&self) -> HttpApiSettings {
        HttpApiSettings {
            timeout: Duration::from_secs(self.http_timeout_secs),
            token: self.token.clone(),
        }
    }

    pub fn reconnect(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_attempts: self.reconnect_attempts,
        }
    }
}

/// Defaults, then `rider.toml` from the working directory, then environment.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let table = raw
                .parse::<Table>()
                .with_context(|| format!("failed to parse {}", path.display()))?;
            apply_file(&mut settings, &table);
        }
        Err(err) if config_path.is_some() => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, table: &Table) {
    let text = |key: &str| table.get(key).and_then(value_as_string);

    if let Some(v) = text("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = text("ws_path") {
        settings.ws_path = v;
    }
    if let Some(v) = text("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = text("session_key") {
        settings.session_key = v;
    }
    if let Some(v) = text("user_id") {
        settings.user_id = v;
    }
    if let Some(v) = text("token") {
        settings.token = Some(v);
    }
    set_parsed(&mut settings.http_timeout_secs, text("http_timeout_secs"));
    set_parsed(&mut settings.search_timeout_secs, text("search_timeout_secs"));
    set_parsed(&mut settings.terminal_display_secs, text("terminal_display_secs"));
    set_parsed(&mut settings.stale_after_minutes, text("stale_after_minutes"));
    set_parsed(&mut settings.reconnect_base_ms, text("reconnect_base_ms"));
    set_parsed(&mut settings.reconnect_attempts, text("reconnect_attempts"));
    set_parsed(
        &mut settings.assumed_distance_miles,
        text("assumed_distance_miles"),
    );
}

/// `APP__*` wins over the plain variable of the same setting.
fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    let pick = |plain: &str, app: &str| var(app).or_else(|| var(plain));

    if let Some(v) = pick("RIDER_SERVER_URL", "APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = pick("DATABASE_URL", "APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__WS_PATH") {
        settings.ws_path = v;
    }
    if let Some(v) = var("APP__SESSION_KEY") {
        settings.session_key = v;
    }
    if let Some(v) = pick("RIDER_USER_ID", "APP__USER_ID") {
        settings.user_id = v;
    }
    if let Some(v) = pick("RIDER_TOKEN", "APP__TOKEN") {
        settings.token = Some(v);
    }
    set_parsed(&mut settings.http_timeout_secs, var("APP__HTTP_TIMEOUT_SECS"));
    set_parsed(
        &mut settings.search_timeout_secs,
        var("APP__SEARCH_TIMEOUT_SECS"),
    );
    set_parsed(
        &mut settings.terminal_display_secs,
        var("APP__TERMINAL_DISPLAY_SECS"),
    );
    set_parsed(
        &mut settings.stale_after_minutes,
        var("APP__STALE_AFTER_MINUTES"),
    );
    set_parsed(&mut settings.reconnect_base_ms, var("APP__RECONNECT_BASE_MS"));
    set_parsed(
        &mut settings.reconnect_attempts,
        var("APP__RECONNECT_ATTEMPTS"),
    );
    set_parsed(
        &mut settings.assumed_distance_miles,
        var("APP__ASSUMED_DISTANCE_MILES"),
    );
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(v) => Some(v.clone()),
        Value::Integer(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Boolean(v) => Some(v.to_string()),
        _ => None,
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, raw: Option<String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse::<T>().ok()) {
        *target = parsed;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }
    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }
    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        if is_windows_drive_path(path) {
            return format!("sqlite:{}", path.replace('\\', "/"));
        }
        return raw_database_url.to_string();
    }
    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url)
        .replace('\\', "/");
    if is_windows_drive_path(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
