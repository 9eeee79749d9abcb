use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{PortletMode, WindowState},
    error::{ApiError, ErrorCode},
    protocol::{
        Event, EventParams, InteractionParams, Lifetime, MarkupContext, MarkupParams, NamedString,
        PortletContext, ProducerReply, ProducerRequest, RegistrationContext, RegistrationData,
        RuntimeContext, ServiceDescription, UserContext,
    },
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::PortalSettings,
    error::{ProducerError, TransportError},
    transport::ProducerTransport,
};

/// Who the consumer is, as announced to producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerIdentity {
    pub consumer_name: String,
    pub consumer_agent: String,
    pub user_id: Option<String>,
}

impl ConsumerIdentity {
    pub fn from_settings(settings: &PortalSettings, user_id: Option<String>) -> Self {
        Self {
            consumer_name: settings.consumer_name.clone(),
            consumer_agent: settings.consumer_agent.clone(),
            user_id,
        }
    }
}

/// Session scoped handshake state held for one producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRegistration {
    pub registration_handle: String,
    pub user_context: UserContext,
    /// Advisory only; registrations are never renewed implicitly.
    pub lifetime: Option<Lifetime>,
}

/// Everything a markup-bearing operation needs to address one portlet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupRequest {
    pub portlet_handle: String,
    pub mode: PortletMode,
    pub window_state: WindowState,
    pub attributes: Vec<NamedString>,
    pub query_string: String,
    pub locales: Vec<String>,
    pub use_get: bool,
}

impl MarkupRequest {
    pub fn new(portlet_handle: impl Into<String>) -> Self {
        Self {
            portlet_handle: portlet_handle.into(),
            mode: PortletMode::default(),
            window_state: WindowState::default(),
            attributes: Vec::new(),
            query_string: String::new(),
            locales: Vec::new(),
            use_get: false,
        }
    }

    fn markup_params(&self) -> MarkupParams {
        MarkupParams {
            mode: self.mode,
            window_state: self.window_state,
            locales: self.locales.clone(),
        }
    }

    fn runtime_context(&self) -> RuntimeContext {
        RuntimeContext {
            attributes: self.attributes.clone(),
            query_string: self.query_string.clone(),
        }
    }

    fn portlet_context(&self) -> PortletContext {
        PortletContext {
            portlet_handle: self.portlet_handle.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupResult {
    pub html: String,
    pub mime_type: String,
    pub locale: Option<String>,
    /// Producer override of the consumer's default markup TTL.
    pub expires_in: Option<Duration>,
}

impl From<MarkupContext> for MarkupResult {
    fn from(value: MarkupContext) -> Self {
        Self {
            html: value.item_string,
            mime_type: value.mime_type,
            locale: value.locale,
            expires_in: value
                .cache_control
                .map(|control| Duration::from_secs(control.expires_secs)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub markup: Option<MarkupResult>,
    pub new_mode: Option<PortletMode>,
    pub new_window_state: Option<WindowState>,
}

/// Typed façade over one producer.
pub struct ProducerClient {
    name: String,
    transport: Arc<dyn ProducerTransport>,
    identity: ConsumerIdentity,
    call_timeout: Duration,
    registration: Mutex<Option<ProducerRegistration>>,
    user_context: Mutex<Option<UserContext>>,
}

impl ProducerClient {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn ProducerTransport>,
        identity: ConsumerIdentity,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            identity,
            call_timeout,
            registration: Mutex::new(None),
            user_context: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    pub async fn registration(&self) -> Option<ProducerRegistration> {
        self.registration.lock().await.clone()
    }

    /// Issued on first use and reused for the rest of the session.
    pub async fn user_context(&self) -> UserContext {
        let mut guard = self.user_context.lock().await;
        guard
            .get_or_insert_with(|| UserContext {
                user_context_key: Uuid::new_v4().to_string(),
                user_id: self.identity.user_id.clone(),
            })
            .clone()
    }

    async fn registration_context(&self) -> Option<RegistrationContext> {
        self.registration
            .lock()
            .await
            .as_ref()
            .map(|registration| RegistrationContext {
                registration_handle: registration.registration_handle.clone(),
            })
    }

    /// Registers the consumer unless a registration is already held.
    pub async fn register(&self) -> Result<ProducerRegistration, ProducerError> {
        // Held across the call so concurrent callers share one handshake.
        let mut guard = self.registration.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let user_context = self.user_context().await;
        let request = ProducerRequest::Register {
            registration_data: RegistrationData {
                consumer_name: self.identity.consumer_name.clone(),
                consumer_agent: self.identity.consumer_agent.clone(),
                method_get_supported: true,
                consumer_modes: PortletMode::ALL.to_vec(),
                consumer_window_states: WindowState::ALL.to_vec(),
            },
            lifetime: None,
            user_context: user_context.clone(),
        };

        let state = match self.call(request).await? {
            ProducerReply::Registration(state) => state,
            other => return Err(unexpected_reply("register", &other)),
        };
        info!(
            producer = %self.name,
            handle = %state.registration_handle,
            "producer: registered consumer"
        );

        let registration = ProducerRegistration {
            registration_handle: state.registration_handle,
            user_context,
            lifetime: state.lifetime.or_else(|| {
                Some(Lifetime {
                    current_time: Utc::now(),
                    termination_time: None,
                    refresh_duration_secs: None,
                })
            }),
        };
        *guard = Some(registration.clone());
        Ok(registration)
    }

    /// Full catalog of portlets the producer offers.
    pub async fn describe(
        &self,
        desired_locales: &[String],
    ) -> Result<ServiceDescription, ProducerError> {
        let request = ProducerRequest::GetServiceDescription {
            registration_context: self.registration_context().await,
            desired_locales: desired_locales.to_vec(),
            portlet_handles: Vec::new(),
            user_context: self.user_context().await,
        };
        let description = match self.call(request).await? {
            ProducerReply::ServiceDescription(description) => description,
            other => return Err(unexpected_reply("get_service_description", &other)),
        };

        if description.requires_registration {
            self.register().await?;
        }
        debug!(
            producer = %self.name,
            portlets = description.offered_portlets.len(),
            "producer: described"
        );
        Ok(description)
    }

    pub async fn render_markup(&self, request: MarkupRequest) -> Result<MarkupResult, ProducerError> {
        let wire = ProducerRequest::GetMarkup {
            registration_context: self.registration_context().await,
            portlet_context: request.portlet_context(),
            runtime_context: request.runtime_context(),
            user_context: self.user_context().await,
            markup_params: request.markup_params(),
            use_get: request.use_get,
        };
        match self.call(wire).await? {
            ProducerReply::Markup(response) => Ok(response.markup_context.into()),
            other => Err(unexpected_reply("get_markup", &other)),
        }
    }

    /// Runs [`Self::render_markup`] on the runtime and hands the outcome to
    /// `on_complete` exactly once.
    pub fn spawn_render_markup<F>(self: &Arc<Self>, request: MarkupRequest, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<MarkupResult, ProducerError>) + Send + 'static,
    {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = client.render_markup(request).await;
            on_complete(result);
        })
    }

    pub async fn perform_interaction(
        &self,
        request: MarkupRequest,
        form_parameters: Vec<NamedString>,
    ) -> Result<UpdateResult, ProducerError> {
        let wire = ProducerRequest::PerformBlockingInteraction {
            registration_context: self.registration_context().await,
            portlet_context: request.portlet_context(),
            runtime_context: request.runtime_context(),
            user_context: self.user_context().await,
            markup_params: request.markup_params(),
            interaction_params: InteractionParams { form_parameters },
        };
        self.update_call("perform_blocking_interaction", wire).await
    }

    pub async fn handle_events(
        &self,
        events: Vec<Event>,
        request: MarkupRequest,
        extensions: Vec<NamedString>,
    ) -> Result<UpdateResult, ProducerError> {
        let wire = ProducerRequest::HandleEvents {
            registration_context: self.registration_context().await,
            portlet_context: request.portlet_context(),
            runtime_context: request.runtime_context(),
            user_context: self.user_context().await,
            markup_params: request.markup_params(),
            event_params: EventParams { events, extensions },
        };
        self.update_call("handle_events", wire).await
    }

    async fn update_call(
        &self,
        operation: &'static str,
        wire: ProducerRequest,
    ) -> Result<UpdateResult, ProducerError> {
        match self.call(wire).await? {
            ProducerReply::Update(update) => Ok(UpdateResult {
                markup: update.markup_context.map(MarkupResult::from),
                new_mode: update.new_mode,
                new_window_state: update.new_window_state,
            }),
            // Some producers answer an update with plain markup.
            ProducerReply::Markup(response) => Ok(UpdateResult {
                markup: Some(response.markup_context.into()),
                ..UpdateResult::default()
            }),
            other => Err(unexpected_reply(operation, &other)),
        }
    }

    async fn call(&self, request: ProducerRequest) -> Result<ProducerReply, ProducerError> {
        let operation = request.operation();
        debug!(producer = %self.name, operation, "producer: call");
        let reply = match tokio::time::timeout(self.call_timeout, self.transport.call(request)).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(producer = %self.name, operation, timeout = ?self.call_timeout, "producer: call timed out");
                return Err(TransportError::Timeout(self.call_timeout).into());
            }
        };
        match reply {
            ProducerReply::Fault(fault) => Err(ProducerError::Fault(fault)),
            reply => Ok(reply),
        }
    }
}

fn unexpected_reply(operation: &str, reply: &ProducerReply) -> ProducerError {
    ProducerError::Fault(ApiError::new(
        ErrorCode::OperationFailed,
        format!("unexpected `{}` reply to {operation}", reply.kind()),
    ))
}

#[cfg(test)]
#[path = "tests/producer_client_tests.rs"]
mod tests;
