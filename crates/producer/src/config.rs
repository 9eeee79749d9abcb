use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

pub const DEFAULT_BIND: &str = "127.0.0.1:8700";
pub const SETTINGS_FILE: &str = "producer.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    /// TOML portlet catalog; the built-in catalog is served when unset.
    pub catalog_path: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.into(),
            catalog_path: None,
            max_body_bytes: 64 * 1024,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
        settings.bind_addr = v.to_string();
    }
    if let Some(v) = file_cfg.get("catalog_path").and_then(toml::Value::as_str) {
        settings.catalog_path = Some(v.to_string());
    }
    if let Some(v) = file_cfg
        .get("max_body_bytes")
        .and_then(toml::Value::as_integer)
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.max_body_bytes = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("PRODUCER_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = var("PRODUCER_CATALOG") {
        settings.catalog_path = Some(v);
    }
    if let Some(v) = var("APP__CATALOG_PATH") {
        settings.catalog_path = Some(v);
    }

    if let Some(v) = var("APP__MAX_BODY_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_body_bytes = parsed;
        }
    }
}

pub fn catalog_exists(settings: &Settings) -> bool {
    settings
        .catalog_path
        .as_deref()
        .is_some_and(|path| Path::new(path).is_file())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
