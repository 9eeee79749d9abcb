use std::sync::Arc;

use shared::domain::{FramePosition, PortletKey, PortletMode, WindowState};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    cache::MarkupCache,
    compose::compose_page,
    config::{PortalConfig, PortalSettings},
    error::PortalResult,
    navigation::PageNavigationState,
    orchestrator::{CycleReport, RequestEnvelope, RequestOrchestrator},
    pool::ProducerPool,
    producer_client::ConsumerIdentity,
    registry::{PortletRegistry, PortletRuntimeContext},
    transport::TransportDirectory,
    PortalEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything one end-user's portal holds between requests: producer
/// clients, the registry of the displayed page, markup freshness and the
/// current navigation state.
pub struct PortalSession {
    config: Arc<PortalConfig>,
    settings: PortalSettings,
    producers: ProducerPool,
    registry: PortletRegistry,
    cache: MarkupCache,
    navigation: Option<PageNavigationState>,
    user_id: Option<String>,
    events: broadcast::Sender<PortalEvent>,
}

impl PortalSession {
    pub fn new(
        config: Arc<PortalConfig>,
        settings: PortalSettings,
        directory: Arc<dyn TransportDirectory>,
        user_id: Option<String>,
    ) -> Self {
        let identity = ConsumerIdentity::from_settings(&settings, user_id.clone());
        let producers = ProducerPool::new(directory, identity, settings.call_timeout());
        let cache = MarkupCache::new(settings.markup_ttl());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            settings,
            producers,
            registry: PortletRegistry::new(),
            cache,
            navigation: None,
            user_id,
            events,
        }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    pub fn producers(&self) -> &ProducerPool {
        &self.producers
    }

    pub fn registry(&self) -> &PortletRegistry {
        &self.registry
    }

    pub fn portlet(&self, key: &PortletKey) -> Option<&PortletRuntimeContext> {
        self.registry.get(key)
    }

    pub fn cache(&self) -> &MarkupCache {
        &self.cache
    }

    pub fn navigation(&self) -> Option<&PageNavigationState> {
        self.navigation.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn event_sender(&self) -> broadcast::Sender<PortalEvent> {
        self.events.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PortalEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PortalEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Navigation language first, then the configured default.
    pub fn locales(&self) -> Vec<String> {
        locales_for(self.navigation.as_ref(), &self.settings)
    }

    /// Builds the registry for `state` and swaps it in. On failure the
    /// displayed page is left untouched.
    pub async fn load_page(&mut self, state: PageNavigationState) -> PortalResult<()> {
        let page = self.config.page(&state.app, &state.page)?;
        let locales = locales_for(Some(&state), &self.settings);
        let registry = PortletRegistry::from_page_config(
            &page.frames,
            &mut self.producers,
            &locales,
            self.user_id.as_deref(),
        )
        .await?;

        for key in self.registry.keys() {
            self.cache.forget(&key);
        }
        self.registry = registry;
        info!(app = %state.app, page = %state.page, "session: page loaded");
        self.navigation = Some(state);
        Ok(())
    }

    /// Switches the language of the displayed page. Cached markup is in the
    /// old language, so every window is rendered again on the next cycle.
    pub fn change_lang(&mut self, lang: Option<String>) {
        let Some(navigation) = self.navigation.as_mut() else {
            return;
        };
        navigation.lang = lang;
        for key in self.registry.keys() {
            self.cache.forget(&key);
        }
        debug!(lang = ?navigation.lang, "session: language changed");
    }

    /// Runs one request cycle against the current page.
    pub async fn handle_request(&mut self, mut envelope: RequestEnvelope) -> PortalResult<CycleReport> {
        if envelope.path.is_none() {
            envelope.path = self.navigation.as_ref().map(PageNavigationState::path);
        }
        let locales = self.locales();
        debug!(path = ?envelope.path, "session: handling request");
        RequestOrchestrator::new(&mut self.registry, &self.producers, &mut self.cache, &self.events)
            .with_locales(locales)
            .with_user(self.user_id.clone())
            .process(&envelope)
            .await
    }

    pub fn change_window_state(&mut self, key: &PortletKey, state: WindowState) -> PortalResult<()> {
        Ok(self.registry.change_window_state(key, state)?)
    }

    pub fn change_mode(&mut self, key: &PortletKey, mode: PortletMode) -> PortalResult<()> {
        Ok(self.registry.change_mode(key, mode)?)
    }

    pub fn remove_window(&mut self, key: &PortletKey) -> Option<PortletRuntimeContext> {
        self.registry.remove_window(key, &mut self.cache)
    }

    pub fn remove_frame(&mut self, position: FramePosition) -> Vec<PortletKey> {
        self.registry.remove_frame(position, &mut self.cache)
    }

    pub fn compose_page(&self) -> String {
        let path = self.navigation.as_ref().map(PageNavigationState::path);
        compose_page(&self.registry, path.as_deref())
    }
}

fn locales_for(navigation: Option<&PageNavigationState>, settings: &PortalSettings) -> Vec<String> {
    let mut locales = Vec::with_capacity(2);
    if let Some(lang) = navigation.and_then(|state| state.lang.clone()) {
        locales.push(lang);
    }
    if !locales.contains(&settings.default_locale) {
        locales.push(settings.default_locale.clone());
    }
    locales
}
