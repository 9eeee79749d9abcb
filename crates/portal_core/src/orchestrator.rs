//! One request/response cycle: interaction, then events, then markup.
//!
//! Producer calls inside a phase are issued together and applied as they
//! resolve; phases themselves run strictly in order. Producer failures land
//! in the failing portlet's status and never abort the cycle. Malformed
//! directives (bad target key, unknown portlet) abort it before any call.

use std::sync::Arc;

use chrono::Utc;
use futures::{stream::FuturesUnordered, StreamExt};
use shared::{
    domain::PortletKey,
    protocol::{Event, NamedString, CLOUBER_EVENT, CLOUBER_LANG, CLOUBER_PATH, CLOUBER_REQUEST, CLOUBER_USER},
    OrderedMap,
};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    cache::MarkupCache,
    error::{ConfigurationError, PortalResult, ProducerError, ProgrammerError},
    pool::ProducerPool,
    producer_client::{MarkupRequest, MarkupResult, ProducerClient, UpdateResult},
    registry::{OperationStatus, PortletRegistry, PortletRuntimeContext},
    PortalEvent,
};

/// A user action: form parameters plus the reserved out-of-band directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub parameters: OrderedMap<String, String>,
    /// Pass-through attributes forwarded to every producer call.
    pub attributes: OrderedMap<String, String>,
    pub query_string: String,
    /// `portletID@producer` of the interaction target (`CLOUBER_REQUEST`).
    pub target: Option<String>,
    /// Event names to deliver (`CLOUBER_EVENT`).
    pub events: Vec<String>,
    /// Current `app/page` (`CLOUBER_PATH`).
    pub path: Option<String>,
}

impl RequestEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a query string into directives and plain parameters.
    /// `CLOUBER_EVENT` may hold several comma separated names.
    pub fn from_query(query: &str) -> Self {
        let mut parameters = OrderedMap::parse_query(query);
        let target = parameters
            .remove(CLOUBER_REQUEST)
            .filter(|value| !value.trim().is_empty());
        let events = parameters
            .remove(CLOUBER_EVENT)
            .map(|raw| split_event_list(&raw))
            .unwrap_or_default();
        let path = parameters
            .remove(CLOUBER_PATH)
            .filter(|value| !value.trim().is_empty());
        let query_string = parameters.to_query();
        Self {
            parameters,
            attributes: OrderedMap::new(),
            query_string,
            target,
            events,
            path,
        }
    }

    pub fn with_target(mut self, key: &PortletKey) -> Self {
        self.target = Some(key.to_string());
        self
    }

    /// Unvalidated target; malformed keys surface when the cycle runs.
    pub fn with_raw_target(mut self, raw: impl Into<String>) -> Self {
        self.target = Some(raw.into());
        self
    }

    pub fn with_event(mut self, name: impl Into<String>) -> Self {
        self.events.push(name.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.put(key.into(), value.into());
        self.query_string = self.parameters.to_query();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.put(key.into(), value.into());
        self
    }
}

fn split_event_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// What a cycle did, for callers and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub interaction: Option<PortletKey>,
    pub event_deliveries: Vec<PortletKey>,
    pub rendered: Vec<PortletKey>,
    /// Portlets whose stored markup was replaced during the cycle.
    pub updated: Vec<PortletKey>,
    pub failures: Vec<(PortletKey, String)>,
    /// Whether the single refresh signal was emitted.
    pub refreshed: bool,
}

pub struct RequestOrchestrator<'a> {
    registry: &'a mut PortletRegistry,
    producers: &'a ProducerPool,
    cache: &'a mut MarkupCache,
    events: &'a broadcast::Sender<PortalEvent>,
    locales: Vec<String>,
    user_id: Option<String>,
}

impl<'a> RequestOrchestrator<'a> {
    pub fn new(
        registry: &'a mut PortletRegistry,
        producers: &'a ProducerPool,
        cache: &'a mut MarkupCache,
        events: &'a broadcast::Sender<PortalEvent>,
    ) -> Self {
        Self {
            registry,
            producers,
            cache,
            events,
            locales: Vec::new(),
            user_id: None,
        }
    }

    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.locales = locales;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub async fn process(mut self, envelope: &RequestEnvelope) -> PortalResult<CycleReport> {
        let target = match envelope.target.as_deref() {
            Some(raw) => Some(self.resolve_target(raw)?),
            None => None,
        };
        debug!(
            target = ?target,
            events = ?envelope.events,
            path = ?envelope.path,
            "orchestrator: cycle started"
        );

        let mut report = CycleReport::default();
        if let Some(key) = target {
            self.interaction_phase(key, envelope, &mut report).await?;
        }
        if !envelope.events.is_empty() {
            self.event_phase(envelope, &mut report).await?;
        }
        self.render_phase(envelope, &mut report).await?;

        if !report.updated.is_empty() {
            // No receivers just means nothing is rendering yet.
            let _ = self.events.send(PortalEvent::Refresh {
                portlets: report.updated.clone(),
            });
            report.refreshed = true;
        }

        info!(
            interaction = report.interaction.is_some(),
            event_deliveries = report.event_deliveries.len(),
            rendered = report.rendered.len(),
            updated = report.updated.len(),
            failures = report.failures.len(),
            "orchestrator: cycle complete"
        );
        Ok(report)
    }

    fn resolve_target(&self, raw: &str) -> PortalResult<PortletKey> {
        let key: PortletKey = raw.trim().parse()?;
        if !self.registry.contains(&key) {
            return Err(ProgrammerError::UnknownPortlet(key).into());
        }
        Ok(key)
    }

    fn client_for(&self, key: &PortletKey) -> PortalResult<Arc<ProducerClient>> {
        self.producers
            .get(key.producer())
            .ok_or_else(|| ConfigurationError::UnknownProducer(key.producer().to_string()).into())
    }

    fn markup_request(&self, context: &PortletRuntimeContext, envelope: &RequestEnvelope) -> MarkupRequest {
        let mut attributes: Vec<NamedString> = envelope
            .attributes
            .iter()
            .map(|(name, value)| NamedString::new(name.as_str(), value.as_str()))
            .collect();
        if let Some(path) = &envelope.path {
            attributes.push(NamedString::new(CLOUBER_PATH, path.as_str()));
        }
        if let Some(user_id) = &self.user_id {
            attributes.push(NamedString::new(CLOUBER_USER, user_id.as_str()));
        }
        if let Some(locale) = self.locales.first() {
            attributes.push(NamedString::new(CLOUBER_LANG, locale.as_str()));
        }

        MarkupRequest {
            portlet_handle: context.portlet_id().to_string(),
            mode: context.mode,
            window_state: context.window_state,
            attributes,
            query_string: envelope.query_string.clone(),
            locales: self.locales.clone(),
            use_get: context
                .config
                .as_ref()
                .is_some_and(|config| config.method_get_supported),
        }
    }

    async fn interaction_phase(
        &mut self,
        key: PortletKey,
        envelope: &RequestEnvelope,
        report: &mut CycleReport,
    ) -> PortalResult<()> {
        let client = self.client_for(&key)?;
        let context = self
            .registry
            .get(&key)
            .ok_or_else(|| ProgrammerError::UnknownPortlet(key.clone()))?;
        let request = self.markup_request(context, envelope);
        let mut form = context.init_parameters.clone();
        form.append(envelope.parameters.clone());
        let form_parameters = form
            .iter()
            .map(|(name, value)| NamedString::new(name.as_str(), value.as_str()))
            .collect();

        debug!(portlet = %key, "orchestrator: interaction");
        let result = client.perform_interaction(request, form_parameters).await;
        self.apply_update(&key, result, report);
        report.interaction = Some(key);
        Ok(())
    }

    async fn event_phase(&mut self, envelope: &RequestEnvelope, report: &mut CycleReport) -> PortalResult<()> {
        let extensions: Vec<NamedString> = envelope
            .parameters
            .iter()
            .map(|(name, value)| NamedString::new(name.as_str(), value.as_str()))
            .collect();

        let mut pending = FuturesUnordered::new();
        for (key, matching) in self.registry.event_handlers(&envelope.events) {
            let Some(context) = self.registry.get(&key) else {
                continue;
            };
            let client = self.client_for(&key)?;
            let request = self.markup_request(context, envelope);
            let events: Vec<Event> = matching.into_iter().map(Event::named).collect();
            let extensions = extensions.clone();
            debug!(portlet = %key, events = ?events, "orchestrator: delivering events");
            pending.push(async move {
                let result = client.handle_events(events, request, extensions).await;
                (key, result)
            });
        }

        while let Some((key, result)) = pending.next().await {
            self.apply_update(&key, result, report);
            report.event_deliveries.push(key);
        }
        Ok(())
    }

    async fn render_phase(&mut self, envelope: &RequestEnvelope, report: &mut CycleReport) -> PortalResult<()> {
        let candidates = self.registry.render_candidates(self.cache, Instant::now());

        let mut pending = FuturesUnordered::new();
        for key in candidates {
            let Some(context) = self.registry.get(&key) else {
                continue;
            };
            let client = self.client_for(&key)?;
            let request = self.markup_request(context, envelope);
            pending.push(async move {
                let result = client.render_markup(request).await;
                (key, result)
            });
        }

        while let Some((key, result)) = pending.next().await {
            self.apply_render(&key, result, report);
            report.rendered.push(key);
        }
        Ok(())
    }

    fn apply_update(
        &mut self,
        key: &PortletKey,
        result: Result<UpdateResult, ProducerError>,
        report: &mut CycleReport,
    ) {
        let Some(context) = self.registry.get_mut(key) else {
            return;
        };
        match result {
            Ok(update) => {
                if let Some(mode) = update.new_mode {
                    context.mode = mode;
                }
                if let Some(state) = update.new_window_state {
                    context.window_state = state;
                }
                match update.markup {
                    Some(markup) => {
                        store_markup(context, self.cache, markup);
                        report.updated.push(key.clone());
                    }
                    None => {
                        // State changed without markup: keep showing the old
                        // fragment but force a fetch in the render phase.
                        context.changed = true;
                        context.status = OperationStatus::Ok;
                        context.message = None;
                        self.cache.expire(key, &context.cache_partition);
                    }
                }
            }
            Err(err) => {
                warn!(portlet = %key, error = %err, "orchestrator: update failed");
                context.record_failure(&err);
                report.failures.push((key.clone(), err.to_string()));
            }
        }
    }

    fn apply_render(
        &mut self,
        key: &PortletKey,
        result: Result<MarkupResult, ProducerError>,
        report: &mut CycleReport,
    ) {
        let Some(context) = self.registry.get_mut(key) else {
            return;
        };
        match result {
            Ok(markup) => {
                store_markup(context, self.cache, markup);
                report.updated.push(key.clone());
            }
            Err(err) => {
                warn!(portlet = %key, error = %err, "orchestrator: render failed");
                context.record_failure(&err);
                // A failed fetch counts as handled until the TTL runs out.
                self.cache
                    .touch(key, &context.cache_partition, Instant::now(), None);
                report.failures.push((key.clone(), err.to_string()));
            }
        }
    }
}

fn store_markup(context: &mut PortletRuntimeContext, cache: &mut MarkupCache, markup: MarkupResult) {
    cache.touch(
        &context.key,
        &context.cache_partition,
        Instant::now(),
        markup.expires_in,
    );
    context.markup = Some(markup.html);
    context.mime_type = Some(markup.mime_type);
    context.changed = false;
    context.status = OperationStatus::Updated;
    context.message = context
        .display
        .status_bar
        .then(|| format!("Updated at {}", Utc::now().format("%H:%M:%S")));
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
