use shared::{
    domain::{PortletKey, PortletMode, WindowState},
    protocol::PATH_CHANGED_EVENT,
};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{error, info};

use crate::{
    error::{PortalError, PortalResult},
    navigation::{NavigationTarget, PageNavigationState},
    orchestrator::{CycleReport, RequestEnvelope},
    session::PortalSession,
    PortalEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Same app and page: only the render cycle ran.
    Rerendered(CycleReport),
    /// A new page was loaded and its first full cycle ran.
    Loaded {
        state: PageNavigationState,
        report: CycleReport,
    },
}

impl NavigationOutcome {
    pub fn report(&self) -> &CycleReport {
        match self {
            NavigationOutcome::Rerendered(report) => report,
            NavigationOutcome::Loaded { report, .. } => report,
        }
    }
}

/// Routes navigation and user actions into the session, one request cycle
/// at a time. Callers queue on the session lock in arrival order.
pub struct PageController {
    session: Mutex<PortalSession>,
    events: broadcast::Sender<PortalEvent>,
}

impl PageController {
    pub fn new(session: PortalSession) -> Self {
        let events = session.event_sender();
        Self {
            session: Mutex::new(session),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PortalEvent> {
        self.events.subscribe()
    }

    /// Decodes `fragment` and either re-renders the current page or loads a
    /// new one seeded with a `pathChanged` event. A language switch on the
    /// current page expires all cached markup instead of reloading it.
    ///
    /// Unknown apps and pages emit [`PortalEvent::PageError`] and return the
    /// configuration error; the displayed page stays as it was.
    pub async fn navigate(&self, fragment: &str) -> PortalResult<NavigationOutcome> {
        let mut session = self.session.lock().await;
        let target = NavigationTarget::parse(fragment);

        let state = match target.resolve(session.config()) {
            Ok(state) => state,
            Err(err) => {
                error!(fragment, error = %err, "page controller: navigation failed");
                session.emit(PortalEvent::PageError {
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };

        let mut envelope = RequestEnvelope::from_query(&target.parameters.to_query());
        envelope.path = Some(state.path());

        let current = session.navigation();
        let same_page = current.is_some_and(|current| current.same_page(&state));
        if same_page {
            if current.is_some_and(|current| current.lang != state.lang) {
                info!(path = %state.path(), lang = ?state.lang, "page controller: language changed");
                session.change_lang(state.lang.clone());
            }
            let report = session.handle_request(envelope).await?;
            return Ok(NavigationOutcome::Rerendered(report));
        }

        if let Err(err) = session.load_page(state.clone()).await {
            error!(path = %state.path(), error = %err, "page controller: page load failed");
            session.emit(PortalEvent::PageError {
                message: err.to_string(),
            });
            return Err(err);
        }
        info!(path = %state.path(), "page controller: navigated");
        session.emit(PortalEvent::PageLoaded(state.clone()));

        let report = session
            .handle_request(envelope.with_event(PATH_CHANGED_EVENT))
            .await?;
        Ok(NavigationOutcome::Loaded { state, report })
    }

    /// Waits for any running cycle, then runs this one.
    pub async fn handle_request(&self, envelope: RequestEnvelope) -> PortalResult<CycleReport> {
        self.session.lock().await.handle_request(envelope).await
    }

    /// Like [`Self::handle_request`] but refuses instead of queueing.
    pub async fn try_handle_request(&self, envelope: RequestEnvelope) -> PortalResult<CycleReport> {
        let mut session = self.session.try_lock().map_err(|_| PortalError::Busy)?;
        session.handle_request(envelope).await
    }

    pub async fn change_window_state(&self, key: &PortletKey, state: WindowState) -> PortalResult<CycleReport> {
        let mut session = self.session.lock().await;
        session.change_window_state(key, state)?;
        session.handle_request(RequestEnvelope::new()).await
    }

    pub async fn change_mode(&self, key: &PortletKey, mode: PortletMode) -> PortalResult<CycleReport> {
        let mut session = self.session.lock().await;
        session.change_mode(key, mode)?;
        session.handle_request(RequestEnvelope::new()).await
    }

    pub async fn compose_page(&self) -> String {
        self.session.lock().await.compose_page()
    }

    /// Direct access to the session between cycles.
    pub async fn lock_session(&self) -> MutexGuard<'_, PortalSession> {
        self.session.lock().await
    }
}

#[cfg(test)]
#[path = "tests/page_controller_tests.rs"]
mod tests;
