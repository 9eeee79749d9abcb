//! Producer wire contract (the WSRP 2.0 subset the consumer uses).
//!
//! Requests and replies travel as externally tagged JSON objects:
//! `{"type": "get_markup", "payload": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{PortletMode, WindowState},
    error::ApiError,
};

/// Request header / attribute carrying the portlet mode.
pub const CLOUBER_MODE: &str = "CLOUBER_MODE";
/// Request header / attribute carrying the window state.
pub const CLOUBER_STATE: &str = "CLOUBER_STATE";
/// Request header / attribute carrying the end-user id.
pub const CLOUBER_USER: &str = "CLOUBER_USER";
/// Request header / attribute and navigation parameter selecting the locale.
pub const CLOUBER_LANG: &str = "CLOUBER_LANG";
/// Request header naming the portlet handle.
pub const CLOUBER_PORTLET: &str = "CLOUBER_PORTLET";
/// Envelope attribute holding the current `app/page` path.
pub const CLOUBER_PATH: &str = "CLOUBER_PATH";
/// Envelope attribute holding the list of event names to deliver.
pub const CLOUBER_EVENT: &str = "CLOUBER_EVENT";
/// Envelope attribute holding the `portletID@producer` interaction target.
pub const CLOUBER_REQUEST: &str = "CLOUBER_REQUEST";

/// Event the page controller injects when navigation lands on a new page.
pub const PATH_CHANGED_EVENT: &str = "pathChanged";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationContext {
    pub registration_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_context_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    pub current_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    pub consumer_name: String,
    pub consumer_agent: String,
    pub method_get_supported: bool,
    pub consumer_modes: Vec<PortletMode>,
    pub consumer_window_states: Vec<WindowState>,
}

/// What a producer declares about one portlet it offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortletDescription {
    pub portlet_handle: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub handled_events: Vec<String>,
    #[serde(default)]
    pub published_events: Vec<String>,
    /// Slash separated, first entry is the default (e.g. `"normal/minimized"`).
    #[serde(default = "default_window_states")]
    pub window_states: String,
    /// Slash separated, first entry is the default (e.g. `"view/edit"`).
    #[serde(default = "default_modes")]
    pub modes: String,
    #[serde(default)]
    pub method_get_supported: bool,
    /// Markup differs per end-user and must not be shared across users.
    #[serde(default)]
    pub user_specific: bool,
}

fn default_window_states() -> String {
    "normal".to_string()
}

fn default_modes() -> String {
    "view".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub offered_portlets: Vec<PortletDescription>,
    #[serde(default)]
    pub requires_registration: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortletContext {
    pub portlet_handle: String,
}

/// Out-of-band request data: the reserved envelope attributes plus the raw query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
    #[serde(default)]
    pub attributes: Vec<NamedString>,
    #[serde(default)]
    pub query_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedString {
    pub name: String,
    pub value: String,
}

impl NamedString {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupParams {
    pub mode: PortletMode,
    pub window_state: WindowState,
    #[serde(default)]
    pub locales: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    pub expires_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupContext {
    pub mime_type: String,
    pub item_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupResponse {
    pub markup_context: MarkupContext,
}

/// Reply to an interaction or event delivery. Markup is optional: a producer
/// may only report that its state changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup_context: Option<MarkupContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_mode: Option<PortletMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_window_state: Option<WindowState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionParams {
    pub form_parameters: Vec<NamedString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Event {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParams {
    pub events: Vec<Event>,
    /// Request parameters forwarded alongside the events.
    #[serde(default)]
    pub extensions: Vec<NamedString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationState {
    pub registration_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<Lifetime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProducerRequest {
    GetServiceDescription {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registration_context: Option<RegistrationContext>,
        desired_locales: Vec<String>,
        #[serde(default)]
        portlet_handles: Vec<String>,
        user_context: UserContext,
    },
    GetMarkup {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registration_context: Option<RegistrationContext>,
        portlet_context: PortletContext,
        runtime_context: RuntimeContext,
        user_context: UserContext,
        markup_params: MarkupParams,
        /// Consumer hint: the portlet accepts the plain GET framing.
        #[serde(default)]
        use_get: bool,
    },
    PerformBlockingInteraction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registration_context: Option<RegistrationContext>,
        portlet_context: PortletContext,
        runtime_context: RuntimeContext,
        user_context: UserContext,
        markup_params: MarkupParams,
        interaction_params: InteractionParams,
    },
    HandleEvents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registration_context: Option<RegistrationContext>,
        portlet_context: PortletContext,
        runtime_context: RuntimeContext,
        user_context: UserContext,
        markup_params: MarkupParams,
        event_params: EventParams,
    },
    Register {
        registration_data: RegistrationData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lifetime: Option<Lifetime>,
        user_context: UserContext,
    },
}

impl ProducerRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            ProducerRequest::GetServiceDescription { .. } => "get_service_description",
            ProducerRequest::GetMarkup { .. } => "get_markup",
            ProducerRequest::PerformBlockingInteraction { .. } => "perform_blocking_interaction",
            ProducerRequest::HandleEvents { .. } => "handle_events",
            ProducerRequest::Register { .. } => "register",
        }
    }

    pub fn portlet_handle(&self) -> Option<&str> {
        match self {
            ProducerRequest::GetMarkup {
                portlet_context, ..
            }
            | ProducerRequest::PerformBlockingInteraction {
                portlet_context, ..
            }
            | ProducerRequest::HandleEvents {
                portlet_context, ..
            } => Some(portlet_context.portlet_handle.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProducerReply {
    ServiceDescription(ServiceDescription),
    Markup(MarkupResponse),
    Update(UpdateResponse),
    Registration(RegistrationState),
    Fault(ApiError),
}

impl ProducerReply {
    pub fn kind(&self) -> &'static str {
        match self {
            ProducerReply::ServiceDescription(_) => "service_description",
            ProducerReply::Markup(_) => "markup",
            ProducerReply::Update(_) => "update",
            ProducerReply::Registration(_) => "registration",
            ProducerReply::Fault(_) => "fault",
        }
    }
}
