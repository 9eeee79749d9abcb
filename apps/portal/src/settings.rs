use std::{fs, path::Path};

use anyhow::Context;
use config::{Config, ConfigError, Environment, File, FileFormat};
use portal_core::{PortalConfig, PortalSettings};

pub const ENV_PREFIX: &str = "PORTAL";
const SETTINGS_KEY: &str = "settings";

/// Reads the page layout and the consumer settings from one TOML file.
///
/// Settings live under `[settings]`; `PORTAL__SETTINGS__<FIELD>` variables
/// override them.
pub fn load(path: &Path) -> anyhow::Result<(PortalConfig, PortalSettings)> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read portal config '{}'", path.display()))?;
    let portal = PortalConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid portal config '{}'", path.display()))?;
    let settings = layered_settings(&raw, environment())
        .with_context(|| format!("invalid [settings] in '{}'", path.display()))?;
    Ok((portal, settings))
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn layered_settings(raw: &str, env: Environment) -> Result<PortalSettings, ConfigError> {
    let layered = Config::builder()
        .add_source(File::from_str(raw, FileFormat::Toml))
        .add_source(env)
        .build()?;
    match layered.get::<PortalSettings>(SETTINGS_KEY) {
        Ok(settings) => Ok(settings),
        Err(ConfigError::NotFound(_)) => Ok(PortalSettings::default()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
