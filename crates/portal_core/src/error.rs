use std::time::Duration;

use shared::{
    domain::{MalformedPortletKey, PortletKey, PortletMode, WindowState},
    error::ApiError,
};
use thiserror::Error;

/// The call never produced a usable reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("producer call timed out after {0:?}")]
    Timeout(Duration),
    #[error("producer answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode producer reply: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            TransportError::Decode(value.to_string())
        } else {
            TransportError::Network(value.to_string())
        }
    }
}

/// Recoverable failure of a single producer operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("producer fault: {0}")]
    Fault(#[from] ApiError),
}

impl ProducerError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ProducerError::Transport(_))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, ProducerError::Fault(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("application `{0}` is not configured")]
    AppNotFound(String),
    #[error("page `{page}` is not configured for application `{app}`")]
    PageNotFound { app: String, page: String },
    #[error("producer `{0}` is not configured")]
    UnknownProducer(String),
    #[error("window `{0}` is declared more than once on the page")]
    DuplicateWindow(PortletKey),
    #[error("invalid producer url `{url}`: {reason}")]
    InvalidProducerUrl { url: String, reason: String },
    #[error("failed to parse portal configuration: {0}")]
    Parse(String),
}

/// Malformed internal call. Never absorbed into portlet status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgrammerError {
    #[error("required field `{field}` is missing ({context})")]
    MissingField {
        field: &'static str,
        context: String,
    },
    #[error(transparent)]
    MalformedPortletKey(#[from] MalformedPortletKey),
    #[error("portlet `{0}` is not registered on the current page")]
    UnknownPortlet(PortletKey),
    #[error("portlet `{key}` does not support window state `{state}`")]
    UnsupportedWindowState { key: PortletKey, state: WindowState },
    #[error("portlet `{key}` does not support mode `{mode}`")]
    UnsupportedMode { key: PortletKey, mode: PortletMode },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("programmer error: {0}")]
    Programmer(#[from] ProgrammerError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error("a request cycle is already in progress")]
    Busy,
}

impl PortalError {
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, PortalError::Programmer(_))
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, PortalError::Configuration(_))
    }

    /// Producer failures and contention can be retried by the next user action.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PortalError::Producer(_) | PortalError::Busy)
    }
}

impl From<MalformedPortletKey> for PortalError {
    fn from(value: MalformedPortletKey) -> Self {
        PortalError::Programmer(value.into())
    }
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;
