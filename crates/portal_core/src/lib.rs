//! Portal consumer: aggregates portlet markup from remote producers into one
//! page and drives the interaction → event → render cycle.

pub mod cache;
pub mod compose;
pub mod config;
pub mod error;
pub mod navigation;
pub mod orchestrator;
pub mod page_controller;
pub mod pool;
pub mod producer_client;
pub mod registry;
pub mod session;
pub mod transport;

use navigation::PageNavigationState;
use shared::domain::PortletKey;

pub use cache::MarkupCache;
pub use config::{PortalConfig, PortalSettings};
pub use error::{
    ConfigurationError, PortalError, PortalResult, ProducerError, ProgrammerError, TransportError,
};
pub use orchestrator::{CycleReport, RequestEnvelope, RequestOrchestrator};
pub use page_controller::{NavigationOutcome, PageController};
pub use producer_client::{MarkupRequest, MarkupResult, ProducerClient, UpdateResult};
pub use registry::{OperationStatus, PortletRegistry, PortletRuntimeContext};
pub use session::PortalSession;
pub use transport::{HttpProducerTransport, ProducerTransport, StaticDirectory, TransportDirectory};

/// Notifications for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalEvent {
    /// Emitted at most once per request cycle, listing every portlet whose
    /// markup was replaced.
    Refresh { portlets: Vec<PortletKey> },
    PageLoaded(PageNavigationState),
    PageError { message: String },
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
