use std::fmt;

use shared::{
    domain::{
        parse_slash_list, FramePosition, PanelStyle, PortletKey, PortletMode, WindowState,
    },
    protocol::{PortletDescription, ServiceDescription},
    OrderedMap,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cache::MarkupCache,
    config::{DisplayFlags, FrameConfig, WindowConfig},
    error::{ConfigurationError, PortalError, PortalResult, ProducerError, ProgrammerError},
    pool::ProducerPool,
};

/// Outcome of the last producer operation for a portlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Ok,
    Updated,
    TransportFailure,
    ProducerFault,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Ok => "ok",
            OperationStatus::Updated => "updated",
            OperationStatus::TransportFailure => "transport_failure",
            OperationStatus::ProducerFault => "producer_fault",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OperationStatus::TransportFailure | OperationStatus::ProducerFault
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ProducerError> for OperationStatus {
    fn from(value: &ProducerError) -> Self {
        match value {
            ProducerError::Transport(_) => OperationStatus::TransportFailure,
            ProducerError::Fault(_) => OperationStatus::ProducerFault,
        }
    }
}

/// Producer-declared metadata merged into a portlet's runtime context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortletConfig {
    pub title: String,
    pub handled_events: Vec<String>,
    pub published_events: Vec<String>,
    pub window_states: Vec<WindowState>,
    pub modes: Vec<PortletMode>,
    pub method_get_supported: bool,
    pub user_specific: bool,
}

impl From<&PortletDescription> for PortletConfig {
    fn from(value: &PortletDescription) -> Self {
        Self {
            title: value.title.clone(),
            handled_events: value.handled_events.clone(),
            published_events: value.published_events.clone(),
            window_states: parse_slash_list(&value.window_states),
            modes: parse_slash_list(&value.modes),
            method_get_supported: value.method_get_supported,
            user_specific: value.user_specific,
        }
    }
}

impl PortletConfig {
    pub fn default_window_state(&self) -> WindowState {
        self.window_states.first().copied().unwrap_or_default()
    }

    pub fn default_mode(&self) -> PortletMode {
        self.modes.first().copied().unwrap_or_default()
    }

    /// The declared events among `events`, in the order given.
    pub fn matching_events(&self, events: &[String]) -> Vec<String> {
        events
            .iter()
            .filter(|event| self.handled_events.iter().any(|handled| handled == *event))
            .cloned()
            .collect()
    }
}

/// Per-window state of one portlet on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortletRuntimeContext {
    pub key: PortletKey,
    pub position: FramePosition,
    pub window_state: WindowState,
    pub mode: PortletMode,
    pub markup: Option<String>,
    pub mime_type: Option<String>,
    /// Producer state changed; markup must be fetched again.
    pub changed: bool,
    pub status: OperationStatus,
    pub message: Option<String>,
    /// Set once, when the producer's description is merged.
    pub config: Option<PortletConfig>,
    pub display: DisplayFlags,
    pub style: Option<String>,
    pub theme: Option<String>,
    pub init_parameters: OrderedMap<String, String>,
    pub cache_partition: String,
}

impl PortletRuntimeContext {
    fn from_window(
        key: PortletKey,
        position: FramePosition,
        window: &WindowConfig,
        user_id: Option<&str>,
    ) -> Self {
        Self {
            key,
            position,
            window_state: WindowState::default(),
            mode: PortletMode::default(),
            markup: None,
            mime_type: None,
            changed: false,
            status: OperationStatus::Pending,
            message: None,
            config: None,
            display: window.display,
            style: window.style.clone(),
            theme: window.theme.clone(),
            init_parameters: window
                .init_parameters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            cache_partition: MarkupCache::partition_for(user_id, false),
        }
    }

    pub fn portlet_id(&self) -> &str {
        self.key.portlet_id()
    }

    pub fn producer(&self) -> &str {
        self.key.producer()
    }

    pub fn title(&self) -> &str {
        self.config
            .as_ref()
            .map(|config| config.title.as_str())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| self.key.portlet_id())
    }

    pub fn handled_events(&self, events: &[String]) -> Vec<String> {
        self.config
            .as_ref()
            .map(|config| config.matching_events(events))
            .unwrap_or_default()
    }

    pub fn is_expired(&self, cache: &MarkupCache, now: Instant) -> bool {
        cache.is_expired(&self.key, &self.cache_partition, now)
    }

    pub fn needs_render(&self, cache: &MarkupCache, now: Instant) -> bool {
        self.markup.as_deref().map_or(true, str::is_empty) || self.changed || self.is_expired(cache, now)
    }

    /// Merges the producer description. Later descriptions are ignored.
    fn merge_description(&mut self, description: &PortletDescription, user_id: Option<&str>) -> bool {
        if self.config.is_some() {
            return false;
        }
        let config = PortletConfig::from(description);
        self.window_state = config.default_window_state();
        self.mode = config.default_mode();
        self.cache_partition = MarkupCache::partition_for(user_id, config.user_specific);
        self.config = Some(config);
        true
    }

    pub(crate) fn record_failure(&mut self, err: &ProducerError) {
        self.status = OperationStatus::from(err);
        self.message = Some(err.to_string());
        self.changed = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub style: PanelStyle,
    pub windows: Vec<PortletKey>,
}

/// Frames in declared order, each holding the keys of its windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLayout {
    frames: OrderedMap<FramePosition, FrameLayout>,
}

impl PageLayout {
    pub fn frames(&self) -> impl Iterator<Item = (&FramePosition, &FrameLayout)> {
        self.frames.iter()
    }

    pub fn frame(&self, position: FramePosition) -> Option<&FrameLayout> {
        self.frames.get(&position)
    }

    fn remove_window(&mut self, key: &PortletKey) {
        self.frames
            .for_each_mut(|_, frame| frame.windows.retain(|existing| existing != key));
    }
}

/// Source of truth for every portlet on the displayed page.
#[derive(Debug, Clone, Default)]
pub struct PortletRegistry {
    portlets: OrderedMap<PortletKey, PortletRuntimeContext>,
    layout: PageLayout,
}

impl PortletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens the frames' windows into runtime contexts, makes sure every
    /// referenced producer has a client and a catalog, and merges each
    /// portlet's description.
    ///
    /// A producer that cannot be described only marks its own portlets as
    /// failed. Missing portlet ids, duplicate windows and unknown producers
    /// fail the whole page.
    pub async fn from_page_config(
        frames: &[FrameConfig],
        producers: &mut ProducerPool,
        desired_locales: &[String],
        user_id: Option<&str>,
    ) -> PortalResult<Self> {
        let mut registry = Self::new();

        for frame in frames {
            let mut layout = FrameLayout {
                style: frame.style,
                windows: Vec::with_capacity(frame.windows.len()),
            };
            for window in &frame.windows {
                if window.portlet_id.trim().is_empty() {
                    return Err(ProgrammerError::MissingField {
                        field: "portlet_id",
                        context: format!("window in frame `{}`", frame.position),
                    }
                    .into());
                }
                let key = PortletKey::new(window.portlet_id.trim(), window.producer_name());
                if registry.portlets.contains_key(&key) {
                    return Err(ConfigurationError::DuplicateWindow(key).into());
                }
                let context = PortletRuntimeContext::from_window(key.clone(), frame.position, window, user_id);
                registry.portlets.put(key.clone(), context);
                layout.windows.push(key);
            }
            match registry.layout.frames.get_mut(&frame.position) {
                // A position declared twice keeps one frame with both window lists.
                Some(existing) => existing.windows.extend(layout.windows),
                None => {
                    registry.layout.frames.put(frame.position, layout);
                }
            }
        }

        let producer_names = registry.producer_names();
        for producer in &producer_names {
            producers.client(producer)?;
        }
        for producer in &producer_names {
            match producers.ensure_described(producer, desired_locales).await {
                Ok(catalog) => registry.merge_catalog(producer, &catalog, user_id),
                Err(PortalError::Producer(err)) => registry.fail_producer(producer, &err),
                Err(other) => return Err(other),
            }
        }

        info!(
            portlets = registry.portlets.size(),
            producers = producer_names.len(),
            "registry: page initialized"
        );
        Ok(registry)
    }

    /// Rebuilds the registry in place. On error the current entries are kept.
    pub async fn init_from_page_config(
        &mut self,
        frames: &[FrameConfig],
        producers: &mut ProducerPool,
        desired_locales: &[String],
        user_id: Option<&str>,
    ) -> PortalResult<()> {
        let rebuilt = Self::from_page_config(frames, producers, desired_locales, user_id).await?;
        *self = rebuilt;
        Ok(())
    }

    fn merge_catalog(&mut self, producer: &str, catalog: &ServiceDescription, user_id: Option<&str>) {
        self.portlets.for_each_mut(|key, context| {
            if key.producer() != producer {
                return;
            }
            let description = catalog
                .offered_portlets
                .iter()
                .find(|description| description.portlet_handle == key.portlet_id());
            match description {
                Some(description) => {
                    if context.merge_description(description, user_id) {
                        debug!(portlet = %key, "registry: merged description");
                    }
                }
                None => {
                    warn!(portlet = %key, "registry: portlet not offered by producer");
                    context.status = OperationStatus::ProducerFault;
                    context.message = Some(format!(
                        "portlet `{}` is not offered by producer `{producer}`",
                        key.portlet_id()
                    ));
                }
            }
        });
    }

    fn fail_producer(&mut self, producer: &str, err: &ProducerError) {
        self.portlets.for_each_mut(|key, context| {
            if key.producer() == producer {
                context.record_failure(err);
            }
        });
    }

    /// Lookups never create entries.
    pub fn get(&self, key: &PortletKey) -> Option<&PortletRuntimeContext> {
        self.portlets.get(key)
    }

    pub fn get_mut(&mut self, key: &PortletKey) -> Option<&mut PortletRuntimeContext> {
        self.portlets.get_mut(key)
    }

    pub fn contains(&self, key: &PortletKey) -> bool {
        self.portlets.contains_key(key)
    }

    pub fn keys(&self) -> Vec<PortletKey> {
        self.portlets.keys()
    }

    pub fn len(&self) -> usize {
        self.portlets.size()
    }

    pub fn is_empty(&self) -> bool {
        self.portlets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortletKey, &PortletRuntimeContext)> {
        self.portlets.iter()
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Distinct producer names in first-reference order.
    pub fn producer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for key in self.portlets.keys() {
            if !names.iter().any(|name| name == key.producer()) {
                names.push(key.producer().to_string());
            }
        }
        names
    }

    /// Portlets declaring interest in any of `events`, with the matching subset.
    pub fn event_handlers(&self, events: &[String]) -> Vec<(PortletKey, Vec<String>)> {
        self.portlets
            .iter()
            .filter_map(|(key, context)| {
                let matching = context.handled_events(events);
                (!matching.is_empty()).then(|| (key.clone(), matching))
            })
            .collect()
    }

    /// Portlets with absent, expired or invalidated markup.
    pub fn render_candidates(&self, cache: &MarkupCache, now: Instant) -> Vec<PortletKey> {
        self.portlets
            .iter()
            .filter(|(_, context)| context.needs_render(cache, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn change_window_state(&mut self, key: &PortletKey, state: WindowState) -> Result<(), ProgrammerError> {
        let context = self
            .portlets
            .get_mut(key)
            .ok_or_else(|| ProgrammerError::UnknownPortlet(key.clone()))?;
        if let Some(config) = &context.config {
            if !config.window_states.is_empty() && !config.window_states.contains(&state) {
                return Err(ProgrammerError::UnsupportedWindowState {
                    key: key.clone(),
                    state,
                });
            }
        }
        if context.window_state != state {
            context.window_state = state;
            context.changed = true;
        }
        Ok(())
    }

    pub fn change_mode(&mut self, key: &PortletKey, mode: PortletMode) -> Result<(), ProgrammerError> {
        let context = self
            .portlets
            .get_mut(key)
            .ok_or_else(|| ProgrammerError::UnknownPortlet(key.clone()))?;
        if let Some(config) = &context.config {
            if !config.modes.is_empty() && !config.modes.contains(&mode) {
                return Err(ProgrammerError::UnsupportedMode {
                    key: key.clone(),
                    mode,
                });
            }
        }
        if context.mode != mode {
            context.mode = mode;
            context.changed = true;
        }
        Ok(())
    }

    /// Destroys one window and its cached fragments.
    pub fn remove_window(&mut self, key: &PortletKey, cache: &mut MarkupCache) -> Option<PortletRuntimeContext> {
        let removed = self.portlets.remove(key)?;
        self.layout.remove_window(key);
        cache.forget(key);
        Some(removed)
    }

    /// Destroys a frame and every window it holds.
    pub fn remove_frame(&mut self, position: FramePosition, cache: &mut MarkupCache) -> Vec<PortletKey> {
        let Some(frame) = self.layout.frames.remove(&position) else {
            return Vec::new();
        };
        for key in &frame.windows {
            self.portlets.remove(key);
            cache.forget(key);
        }
        frame.windows
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
