use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::{ClientSettings, Viewport};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub server_url: Option<String>,
    pub card_width: f64,
    pub card_height: f64,
    pub char_width: f64,
    pub line_height: f64,
    pub drag_threshold_fraction: f64,
    pub page_cache_turns: usize,
    pub resize_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let client = ClientSettings::default();
        Self {
            server_url: None,
            card_width: client.initial_viewport.width,
            card_height: client.initial_viewport.height,
            char_width: 8.0,
            line_height: 16.0,
            drag_threshold_fraction: client.drag_threshold_fraction,
            page_cache_turns: client.page_cache_turns,
            resize_debounce_ms: client.resize_debounce.as_millis() as u64,
        }
    }
}

impl Settings {
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            drag_threshold_fraction: self.drag_threshold_fraction,
            resize_debounce: Duration::from_millis(self.resize_debounce_ms),
            page_cache_turns: self.page_cache_turns,
            initial_viewport: Viewport::new(self.card_width, self.card_height),
            ..ClientSettings::default()
        }
    }
}

/// Defaults, then `path` if it exists, then `APP__*` environment variables.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => apply(&mut settings, |key| {
                file_cfg.get(key).map(|value| match value {
                    toml::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
            }),
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable config file"),
        }
    }

    apply(&mut settings, |key| {
        std::env::var(format!("APP__{}", key.to_ascii_uppercase())).ok()
    });

    settings
}

fn apply(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("server_url") {
        settings.server_url = Some(v).filter(|url| !url.trim().is_empty());
    }
    parse_into(&lookup, "card_width", &mut settings.card_width);
    parse_into(&lookup, "card_height", &mut settings.card_height);
    parse_into(&lookup, "char_width", &mut settings.char_width);
    parse_into(&lookup, "line_height", &mut settings.line_height);
    parse_into(&lookup, "drag_threshold_fraction", &mut settings.drag_threshold_fraction);
    parse_into(&lookup, "page_cache_turns", &mut settings.page_cache_turns);
    parse_into(&lookup, "resize_debounce_ms", &mut settings.resize_debounce_ms);
}

fn parse_into<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable setting"),
    }
}
