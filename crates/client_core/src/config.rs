use std::{collections::HashMap, fs, path::Path, str::FromStr, time::Duration};

use toml::{Table, Value};

use tracing::warn;

use crate::{channel::ReconnectPolicy, reconciler::ReconcilePolicy};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub policy: ReconcilePolicy,
    pub confirm_joins_optimistically: bool,
    pub track_leaves: bool,
    pub event_buffer: usize,
    pub reconnect_delay_ms: u64,
    pub reconnect_attempts: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            policy: ReconcilePolicy::OptimisticLocal,
            confirm_joins_optimistically: true,
            track_leaves: true,
            event_buffer: 256,
            reconnect_delay_ms: 1_000,
            reconnect_attempts: 5,
        }
    }
}

impl ClientSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            attempts: self.reconnect_attempts,
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then the process environment.
pub fn load_settings() -> ClientSettings {
    load_settings_with(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        match raw.parse::<Table>() {
            Ok(table) => {
                let file_cfg = scalars(table);
                apply(&mut settings, |key| file_cfg.get(key).cloned());
            }
            Err(err) => warn!(path = %file.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    apply(&mut settings, |key| env(&format!("APP__{}", key.to_ascii_uppercase())));

    settings
}

/// Flattens top-level scalars to strings so `track_leaves = false` and
/// `track_leaves = "false"` read the same. Tables and arrays are skipped.
fn scalars(table: Table) -> HashMap<String, String> {
    table
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Integer(n) => n.to_string(),
                Value::Boolean(b) => b.to_string(),
                Value::Float(f) => f.to_string(),
                other => {
                    warn!(key, kind = other.type_str(), "config: ignoring non-scalar setting");
                    return None;
                }
            };
            Some((key, text))
        })
        .collect()
}

fn apply(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = parsed(&lookup, "reconcile_policy") {
        settings.policy = v;
    }
    if let Some(v) = parsed(&lookup, "confirm_joins") {
        settings.confirm_joins_optimistically = v;
    }
    if let Some(v) = parsed(&lookup, "track_leaves") {
        settings.track_leaves = v;
    }
    if let Some(v) = parsed(&lookup, "event_buffer") {
        settings.event_buffer = v;
    }
    if let Some(v) = parsed(&lookup, "reconnect_delay_ms") {
        settings.reconnect_delay_ms = v;
    }
    if let Some(v) = parsed(&lookup, "reconnect_attempts") {
        settings.reconnect_attempts = v;
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = %raw, "config: ignoring unparseable value: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
