use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{FramePosition, PanelStyle},
    error::{ApiError, ErrorCode},
    protocol::{
        CacheControl, MarkupContext, MarkupResponse, PortletDescription, ProducerReply,
        ProducerRequest, RegistrationState, ServiceDescription, UpdateResponse,
    },
};
use tokio::sync::broadcast;

use crate::{
    cache::MarkupCache,
    config::{FrameConfig, WindowConfig},
    error::{PortalResult, TransportError},
    orchestrator::{CycleReport, RequestEnvelope, RequestOrchestrator},
    pool::ProducerPool,
    producer_client::ConsumerIdentity,
    registry::PortletRegistry,
    transport::{ProducerTransport, StaticDirectory, TransportDirectory},
    PortalEvent,
};

pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const MARKUP_TTL: Duration = Duration::from_secs(600);

/// What the scripted transport does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(ProducerReply),
    Fail(TransportError),
    Delay(Duration, ProducerReply),
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub portlet: Option<String>,
    pub request: ProducerRequest,
}

/// In-memory producer that records every call. Unscripted calls get the
/// catalog, `<p>{handle}</p>` markup, an empty update or a registration.
pub struct ScriptedTransport {
    catalog: ServiceDescription,
    scripted: Mutex<HashMap<(&'static str, String), VecDeque<Step>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(catalog: ServiceDescription) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Queues `step` for the next `operation` on `portlet` (`""` for
    /// operations that do not address a portlet).
    pub fn script(&self, operation: &'static str, portlet: &str, step: Step) {
        self.scripted
            .lock()
            .expect("script lock")
            .entry((operation, portlet.to_string()))
            .or_default()
            .push_back(step);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn operations(&self) -> Vec<(&'static str, Option<String>)> {
        self.calls()
            .into_iter()
            .map(|call| (call.operation, call.portlet))
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    pub fn count_for(&self, operation: &str, portlet: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.operation == operation && call.portlet.as_deref() == Some(portlet))
            .count()
    }

    pub fn requests_for(&self, operation: &str, portlet: &str) -> Vec<ProducerRequest> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation && call.portlet.as_deref() == Some(portlet))
            .map(|call| call.request)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().expect("calls lock").clear();
    }

    fn default_step(&self, request: &ProducerRequest) -> Step {
        let reply = match request {
            ProducerRequest::GetServiceDescription { .. } => {
                ProducerReply::ServiceDescription(self.catalog.clone())
            }
            ProducerRequest::GetMarkup { portlet_context, .. } => {
                markup_reply(&format!("<p>{}</p>", portlet_context.portlet_handle))
            }
            ProducerRequest::PerformBlockingInteraction { .. } | ProducerRequest::HandleEvents { .. } => {
                update_reply(None)
            }
            ProducerRequest::Register { .. } => ProducerReply::Registration(RegistrationState {
                registration_handle: "reg-1".to_string(),
                lifetime: None,
            }),
        };
        Step::Reply(reply)
    }
}

#[async_trait]
impl ProducerTransport for ScriptedTransport {
    async fn call(&self, request: ProducerRequest) -> Result<ProducerReply, TransportError> {
        let operation = request.operation();
        let portlet = request.portlet_handle().map(str::to_string);
        self.calls.lock().expect("calls lock").push(RecordedCall {
            operation,
            portlet: portlet.clone(),
            request: request.clone(),
        });

        let scripted = self
            .scripted
            .lock()
            .expect("script lock")
            .get_mut(&(operation, portlet.unwrap_or_default()))
            .and_then(VecDeque::pop_front);
        match scripted.unwrap_or_else(|| self.default_step(&request)) {
            Step::Reply(reply) => Ok(reply),
            Step::Fail(err) => Err(err),
            Step::Delay(delay, reply) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn description(handle: &str, handled_events: &[&str]) -> PortletDescription {
    PortletDescription {
        portlet_handle: handle.to_string(),
        title: format!("{handle} portlet"),
        handled_events: handled_events.iter().map(|event| event.to_string()).collect(),
        published_events: Vec::new(),
        window_states: "normal/minimized/maximized".to_string(),
        modes: "view/edit/help".to_string(),
        method_get_supported: false,
        user_specific: false,
    }
}

pub fn catalog(portlets: Vec<PortletDescription>) -> ServiceDescription {
    ServiceDescription {
        offered_portlets: portlets,
        requires_registration: false,
    }
}

pub fn markup_context(html: &str) -> MarkupContext {
    MarkupContext {
        mime_type: "text/html".to_string(),
        item_string: html.to_string(),
        locale: None,
        cache_control: None,
    }
}

pub fn markup_reply(html: &str) -> ProducerReply {
    ProducerReply::Markup(MarkupResponse {
        markup_context: markup_context(html),
    })
}

pub fn markup_reply_expiring(html: &str, expires_secs: u64) -> ProducerReply {
    let mut context = markup_context(html);
    context.cache_control = Some(CacheControl { expires_secs });
    ProducerReply::Markup(MarkupResponse {
        markup_context: context,
    })
}

pub fn update_reply(html: Option<&str>) -> ProducerReply {
    ProducerReply::Update(UpdateResponse {
        markup_context: html.map(markup_context),
        ..UpdateResponse::default()
    })
}

pub fn fault_reply(code: ErrorCode, message: &str) -> ProducerReply {
    ProducerReply::Fault(ApiError::new(code, message))
}

pub fn network_failure() -> TransportError {
    TransportError::Network("connection refused".to_string())
}

pub fn window(portlet_id: &str) -> WindowConfig {
    WindowConfig::new(portlet_id)
}

pub fn frame(position: FramePosition, windows: Vec<WindowConfig>) -> FrameConfig {
    FrameConfig {
        position,
        style: PanelStyle::default(),
        windows,
    }
}

pub fn identity() -> ConsumerIdentity {
    ConsumerIdentity {
        consumer_name: "portal".to_string(),
        consumer_agent: "portal-tests".to_string(),
        user_id: None,
    }
}

pub fn directory(producers: &[(&str, Arc<ScriptedTransport>)]) -> Arc<dyn TransportDirectory> {
    let mut directory = StaticDirectory::new();
    for (name, transport) in producers {
        directory.insert(*name, Arc::clone(transport) as Arc<dyn ProducerTransport>);
    }
    Arc::new(directory)
}

pub fn pool(directory: Arc<dyn TransportDirectory>) -> ProducerPool {
    ProducerPool::new(directory, identity(), CALL_TIMEOUT)
}

/// A described page plus the collaborators an orchestrator borrows.
pub struct Harness {
    pub registry: PortletRegistry,
    pub producers: ProducerPool,
    pub cache: MarkupCache,
    pub events: broadcast::Sender<PortalEvent>,
    pub receiver: broadcast::Receiver<PortalEvent>,
    pub locales: Vec<String>,
}

impl Harness {
    pub async fn new(frames: Vec<FrameConfig>, directory: Arc<dyn TransportDirectory>) -> Self {
        let mut producers = pool(directory);
        let locales = vec!["en".to_string()];
        let registry = PortletRegistry::from_page_config(&frames, &mut producers, &locales, None)
            .await
            .expect("registry");
        let (events, receiver) = broadcast::channel(16);
        Self {
            registry,
            producers,
            cache: MarkupCache::new(MARKUP_TTL),
            events,
            receiver,
            locales,
        }
    }

    pub async fn run(&mut self, envelope: RequestEnvelope) -> PortalResult<CycleReport> {
        RequestOrchestrator::new(&mut self.registry, &self.producers, &mut self.cache, &self.events)
            .with_locales(self.locales.clone())
            .process(&envelope)
            .await
    }

    pub fn drain_events(&mut self) -> Vec<PortalEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            drained.push(event);
        }
        drained
    }
}
