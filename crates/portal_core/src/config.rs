use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use shared::domain::{FramePosition, PanelStyle, DEFAULT_PRODUCER};

use crate::error::ConfigurationError;

pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MARKUP_TTL_SECS: u64 = 600;
pub const DEFAULT_LOCALE: &str = "en";
pub const DEFAULT_LOCAL_PRODUCER_URL: &str = "http://127.0.0.1:8700";

/// Consumer-side runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub call_timeout_ms: u64,
    pub markup_ttl_secs: u64,
    pub consumer_name: String,
    pub consumer_agent: String,
    pub default_locale: String,
    /// Base url of the `localhost` producer when the configuration does not name one.
    pub local_producer_url: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            markup_ttl_secs: DEFAULT_MARKUP_TTL_SECS,
            consumer_name: "portal".to_string(),
            consumer_agent: concat!("portal_core/", env!("CARGO_PKG_VERSION")).to_string(),
            default_locale: DEFAULT_LOCALE.to_string(),
            local_producer_url: DEFAULT_LOCAL_PRODUCER_URL.to_string(),
        }
    }
}

impl PortalSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn markup_ttl(&self) -> Duration {
        Duration::from_secs(self.markup_ttl_secs)
    }
}

/// Page → frame → window tree plus the producers it references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub default_app: Option<String>,
    #[serde(default)]
    pub producers: BTreeMap<String, ProducerEndpoint>,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerEndpoint {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub default_page: Option<String>,
    #[serde(default)]
    pub pages: Vec<PageConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageConfig {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub frames: Vec<FrameConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    pub position: FramePosition,
    #[serde(default)]
    pub style: PanelStyle,
    #[serde(default)]
    pub windows: Vec<WindowConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default)]
    pub portlet_id: String,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub init_parameters: BTreeMap<String, String>,
    #[serde(flatten)]
    pub display: DisplayFlags,
}

impl WindowConfig {
    pub fn new(portlet_id: impl Into<String>) -> Self {
        Self {
            portlet_id: portlet_id.into(),
            ..Self::default()
        }
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    pub fn producer_name(&self) -> &str {
        self.producer
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PRODUCER)
    }
}

/// Window chrome switches. Only consulted by the orchestrator for the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayFlags {
    pub border: bool,
    pub title_bar: bool,
    pub status_bar: bool,
    pub close: bool,
    pub thumbnail: bool,
    pub option: bool,
}

impl Default for DisplayFlags {
    fn default() -> Self {
        Self {
            border: true,
            title_bar: true,
            status_bar: false,
            close: false,
            thumbnail: false,
            option: false,
        }
    }
}

impl PortalConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(raw).map_err(|err| ConfigurationError::Parse(err.to_string()))
    }

    pub fn app(&self, name: &str) -> Result<&AppConfig, ConfigurationError> {
        self.apps
            .iter()
            .find(|app| app.name == name)
            .ok_or_else(|| ConfigurationError::AppNotFound(name.to_string()))
    }

    /// Explicit default, else the first declared application.
    pub fn default_app_name(&self) -> Option<&str> {
        self.default_app
            .as_deref()
            .or_else(|| self.apps.first().map(|app| app.name.as_str()))
    }

    pub fn page(&self, app: &str, page: &str) -> Result<&PageConfig, ConfigurationError> {
        self.app(app)?
            .pages
            .iter()
            .find(|candidate| candidate.name == page)
            .ok_or_else(|| ConfigurationError::PageNotFound {
                app: app.to_string(),
                page: page.to_string(),
            })
    }
}

impl AppConfig {
    pub fn default_page_name(&self) -> Option<&str> {
        self.default_page
            .as_deref()
            .or_else(|| self.pages.first().map(|page| page.name.as_str()))
    }
}
