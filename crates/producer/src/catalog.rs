use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;
use shared::{
    domain::{parse_slash_list, PortletMode, WindowState},
    protocol::{PortletDescription, ServiceDescription},
};

/// One portlet the producer serves.
///
/// `markup` is a template; `{handle}`, `{title}`, `{mode}`, `{state}`,
/// `{lang}`, `{user}`, `{path}` and `{query}` are substituted on render.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortletEntry {
    pub handle: String,
    #[serde(default)]
    pub title: String,
    pub markup: String,
    #[serde(default)]
    pub edit_markup: Option<String>,
    #[serde(default)]
    pub help_markup: Option<String>,
    #[serde(default)]
    pub handled_events: Vec<String>,
    #[serde(default)]
    pub published_events: Vec<String>,
    #[serde(default = "default_window_states")]
    pub window_states: String,
    #[serde(default = "default_modes")]
    pub modes: String,
    #[serde(default)]
    pub method_get_supported: bool,
    #[serde(default)]
    pub user_specific: bool,
    #[serde(default)]
    pub expires_secs: Option<u64>,
}

fn default_window_states() -> String {
    "normal/minimized/maximized".to_string()
}

fn default_modes() -> String {
    "view".to_string()
}

impl PortletEntry {
    pub fn supports_mode(&self, mode: PortletMode) -> bool {
        parse_slash_list::<PortletMode>(&self.modes).contains(&mode)
    }

    pub fn supports_window_state(&self, state: WindowState) -> bool {
        parse_slash_list::<WindowState>(&self.window_states).contains(&state)
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handled_events.iter().any(|handled| handled == event)
    }

    /// Template for `mode`, falling back to the view template.
    pub fn template(&self, mode: PortletMode) -> &str {
        let specific = match mode {
            PortletMode::Edit => self.edit_markup.as_deref(),
            PortletMode::Help => self.help_markup.as_deref(),
            PortletMode::View | PortletMode::Preview => None,
        };
        specific.unwrap_or(&self.markup)
    }

    pub fn description(&self) -> PortletDescription {
        PortletDescription {
            portlet_handle: self.handle.clone(),
            title: self.title.clone(),
            handled_events: self.handled_events.clone(),
            published_events: self.published_events.clone(),
            window_states: self.window_states.clone(),
            modes: self.modes.clone(),
            method_get_supported: self.method_get_supported,
            user_specific: self.user_specific,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub requires_registration: bool,
    #[serde(default)]
    pub portlets: Vec<PortletEntry>,
}

impl Catalog {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let catalog: Self = toml::from_str(raw).context("invalid portlet catalog")?;
        for (index, entry) in catalog.portlets.iter().enumerate() {
            if entry.handle.trim().is_empty() {
                anyhow::bail!("portlet #{index} in catalog has an empty handle");
            }
            if catalog.portlets[..index]
                .iter()
                .any(|earlier| earlier.handle == entry.handle)
            {
                anyhow::bail!("portlet `{}` is declared twice in catalog", entry.handle);
            }
        }
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog '{}'", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn get(&self, handle: &str) -> Option<&PortletEntry> {
        self.portlets.iter().find(|entry| entry.handle == handle)
    }

    /// Every portlet, or only the requested handles when any are given.
    pub fn service_description(&self, handles: &[String]) -> ServiceDescription {
        ServiceDescription {
            offered_portlets: self
                .portlets
                .iter()
                .filter(|entry| handles.is_empty() || handles.contains(&entry.handle))
                .map(PortletEntry::description)
                .collect(),
            requires_registration: self.requires_registration,
        }
    }

    /// Served when no catalog file is configured.
    pub fn builtin() -> Self {
        let raw = include_str!("../catalog.toml");
        // The bundled file is covered by tests; an empty catalog beats a crash.
        Self::from_toml_str(raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses() {
        let catalog = Catalog::from_toml_str(include_str!("../catalog.toml")).expect("catalog");
        assert!(catalog.get("news").is_some());
        assert!(catalog.get("news").expect("news").handles("refresh"));
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let raw = r#"
[[portlets]]
handle = "news"
markup = "a"

[[portlets]]
handle = "news"
markup = "b"
"#;
        let err = Catalog::from_toml_str(raw).expect_err("duplicate");
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn mode_templates_fall_back_to_view() {
        let raw = r#"
[[portlets]]
handle = "poll"
markup = "view"
edit_markup = "edit"
modes = "view/edit/help"
"#;
        let catalog = Catalog::from_toml_str(raw).expect("catalog");
        let poll = catalog.get("poll").expect("poll");
        assert_eq!(poll.template(PortletMode::Edit), "edit");
        assert_eq!(poll.template(PortletMode::Help), "view");
        assert!(poll.supports_mode(PortletMode::Help));
        assert!(!poll.supports_mode(PortletMode::Preview));
        assert!(poll.supports_window_state(WindowState::Maximized));
        assert!(!poll.supports_window_state(WindowState::Solo));
    }

    #[test]
    fn description_can_be_filtered_by_handle() {
        let catalog = Catalog::builtin();
        let description = catalog.service_description(&["weather".to_string()]);
        assert_eq!(description.offered_portlets.len(), 1);
        assert_eq!(description.offered_portlets[0].portlet_handle, "weather");
    }
}
