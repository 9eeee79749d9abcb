//! Reference producer: serves a TOML portlet catalog over the consumer wire contract.
//!
//! `POST /wsrp` answers every operation with a tagged JSON reply; portlets that
//! accept the plain framing are also reachable at `GET /portlets/{handle}`.

pub mod catalog;
pub mod config;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use shared::{
    domain::{PortletMode, WindowState, PUBLIC_PARTITION},
    error::{ApiError, ErrorCode},
    html::escape,
    protocol::{
        CacheControl, Event, Lifetime, MarkupContext, MarkupParams, MarkupResponse, NamedString,
        ProducerReply, ProducerRequest, RegistrationContext, RegistrationData, RegistrationState,
        RuntimeContext, UpdateResponse, UserContext, CLOUBER_LANG, CLOUBER_MODE, CLOUBER_PATH,
        CLOUBER_STATE, CLOUBER_USER,
    },
};
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, PortletEntry};

/// Form field asking the producer to skip markup in the interaction reply.
pub const DEFER_RENDER_FIELD: &str = "defer_render";
/// Form field requesting a mode switch.
pub const NEW_MODE_FIELD: &str = "new_mode";
/// Form field requesting a window state switch.
pub const NEW_WINDOW_STATE_FIELD: &str = "new_window_state";

/// What one portlet remembers for one partition between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortletSession {
    pub form: Vec<NamedString>,
    pub events: Vec<String>,
}

pub struct ProducerState {
    catalog: Catalog,
    registrations: Mutex<HashSet<String>>,
    next_registration: AtomicU64,
    // keyed by (partition, portlet handle)
    sessions: Mutex<HashMap<(String, String), PortletSession>>,
}

struct RenderContext<'a> {
    mode: PortletMode,
    window_state: WindowState,
    lang: &'a str,
    user: &'a str,
    path: &'a str,
    query: &'a str,
}

impl<'a> RenderContext<'a> {
    fn new(
        params: &'a MarkupParams,
        user_context: &'a UserContext,
        runtime: &'a RuntimeContext,
    ) -> Self {
        Self {
            mode: params.mode,
            window_state: params.window_state,
            lang: params.locales.first().map(String::as_str).unwrap_or("en"),
            user: user_context.user_id.as_deref().unwrap_or("guest"),
            path: runtime
                .attributes
                .iter()
                .find(|attribute| attribute.name == CLOUBER_PATH)
                .map(|attribute| attribute.value.as_str())
                .unwrap_or_default(),
            query: runtime.query_string.trim_start_matches('?'),
        }
    }
}

impl ProducerState {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            registrations: Mutex::new(HashSet::new()),
            next_registration: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn registration_count(&self) -> usize {
        self.registrations.lock().await.len()
    }

    pub async fn session(&self, partition: &str, handle: &str) -> Option<PortletSession> {
        self.sessions
            .lock()
            .await
            .get(&(partition.to_string(), handle.to_string()))
            .cloned()
    }

    /// Answers one wire request; faults come back as `Err`.
    pub async fn handle(&self, request: ProducerRequest) -> Result<ProducerReply, ApiError> {
        match request {
            ProducerRequest::GetServiceDescription {
                registration_context,
                portlet_handles,
                ..
            } => {
                if registration_context.is_some() {
                    self.check_registration(registration_context.as_ref()).await?;
                }
                Ok(ProducerReply::ServiceDescription(
                    self.catalog.service_description(&portlet_handles),
                ))
            }
            ProducerRequest::Register {
                registration_data,
                lifetime,
                ..
            } => self.register(registration_data, lifetime).await,
            ProducerRequest::GetMarkup {
                registration_context,
                portlet_context,
                runtime_context,
                user_context,
                markup_params,
                ..
            } => {
                self.check_registration(registration_context.as_ref()).await?;
                let entry = self.portlet(&portlet_context.portlet_handle)?;
                let markup_context = self
                    .markup(entry, &markup_params, &user_context, &runtime_context)
                    .await?;
                Ok(ProducerReply::Markup(MarkupResponse { markup_context }))
            }
            ProducerRequest::PerformBlockingInteraction {
                registration_context,
                portlet_context,
                runtime_context,
                user_context,
                markup_params,
                interaction_params,
            } => {
                self.check_registration(registration_context.as_ref()).await?;
                let entry = self.portlet(&portlet_context.portlet_handle)?;
                self.interact(
                    entry,
                    markup_params,
                    &user_context,
                    &runtime_context,
                    interaction_params.form_parameters,
                )
                .await
            }
            ProducerRequest::HandleEvents {
                registration_context,
                portlet_context,
                runtime_context,
                user_context,
                markup_params,
                event_params,
            } => {
                self.check_registration(registration_context.as_ref()).await?;
                let entry = self.portlet(&portlet_context.portlet_handle)?;
                self.deliver_events(
                    entry,
                    &markup_params,
                    &user_context,
                    &runtime_context,
                    event_params.events,
                )
                .await
            }
        }
    }

    async fn register(
        &self,
        data: RegistrationData,
        lifetime: Option<Lifetime>,
    ) -> Result<ProducerReply, ApiError> {
        if data.consumer_name.trim().is_empty() {
            return Err(ApiError::new(
                ErrorCode::MissingParameters,
                "consumer_name is required",
            ));
        }
        let sequence = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let registration_handle = format!("reg-{sequence}");
        self.registrations
            .lock()
            .await
            .insert(registration_handle.clone());
        info!(
            consumer = %data.consumer_name,
            agent = %data.consumer_agent,
            %registration_handle,
            "producer: consumer registered"
        );
        Ok(ProducerReply::Registration(RegistrationState {
            registration_handle,
            lifetime: lifetime.map(|requested| Lifetime {
                current_time: Utc::now(),
                termination_time: requested.termination_time,
                refresh_duration_secs: requested.refresh_duration_secs,
            }),
        }))
    }

    async fn check_registration(
        &self,
        context: Option<&RegistrationContext>,
    ) -> Result<(), ApiError> {
        match context {
            Some(context) => {
                if self
                    .registrations
                    .lock()
                    .await
                    .contains(&context.registration_handle)
                {
                    Ok(())
                } else {
                    Err(ApiError::new(
                        ErrorCode::InvalidRegistration,
                        format!("unknown registration {}", context.registration_handle),
                    ))
                }
            }
            None if self.catalog.requires_registration => Err(ApiError::new(
                ErrorCode::InvalidRegistration,
                "this producer requires registration",
            )),
            None => Ok(()),
        }
    }

    fn portlet(&self, handle: &str) -> Result<&PortletEntry, ApiError> {
        self.catalog.get(handle).ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidHandle, format!("unknown portlet {handle}"))
        })
    }

    async fn markup(
        &self,
        entry: &PortletEntry,
        params: &MarkupParams,
        user_context: &UserContext,
        runtime: &RuntimeContext,
    ) -> Result<MarkupContext, ApiError> {
        check_params(entry, params)?;
        let session = self
            .session(partition(entry, user_context), &entry.handle)
            .await
            .unwrap_or_default();
        let ctx = RenderContext::new(params, user_context, runtime);
        let mut body = render(entry, &ctx);
        body.push_str(&session_markup(&session));
        Ok(markup_context(entry, &ctx, body))
    }

    async fn interact(
        &self,
        entry: &PortletEntry,
        mut params: MarkupParams,
        user_context: &UserContext,
        runtime: &RuntimeContext,
        form: Vec<NamedString>,
    ) -> Result<ProducerReply, ApiError> {
        check_params(entry, &params)?;

        let mut update = UpdateResponse::default();
        if let Some(raw) = form_value(&form, NEW_MODE_FIELD) {
            let mode = raw.parse::<PortletMode>().map_err(|err| {
                ApiError::new(ErrorCode::UnsupportedMode, err)
            })?;
            if !entry.supports_mode(mode) {
                return Err(unsupported_mode(entry, mode));
            }
            params.mode = mode;
            update.new_mode = Some(mode);
        }
        if let Some(raw) = form_value(&form, NEW_WINDOW_STATE_FIELD) {
            let state = raw.parse::<WindowState>().map_err(|err| {
                ApiError::new(ErrorCode::UnsupportedWindowState, err)
            })?;
            if !entry.supports_window_state(state) {
                return Err(unsupported_state(entry, state));
            }
            params.window_state = state;
            update.new_window_state = Some(state);
        }
        let defer_render = form_value(&form, DEFER_RENDER_FIELD) == Some("true");

        let stored: Vec<NamedString> = form
            .into_iter()
            .filter(|field| {
                field.name != DEFER_RENDER_FIELD
                    && field.name != NEW_MODE_FIELD
                    && field.name != NEW_WINDOW_STATE_FIELD
            })
            .collect();
        debug!(
            portlet = %entry.handle,
            fields = stored.len(),
            defer_render,
            "producer: interaction"
        );
        self.sessions
            .lock()
            .await
            .entry((partition(entry, user_context).to_string(), entry.handle.clone()))
            .or_default()
            .form = stored;

        if !defer_render {
            update.markup_context = Some(self.markup(entry, &params, user_context, runtime).await?);
        }
        Ok(ProducerReply::Update(update))
    }

    async fn deliver_events(
        &self,
        entry: &PortletEntry,
        params: &MarkupParams,
        user_context: &UserContext,
        runtime: &RuntimeContext,
        events: Vec<Event>,
    ) -> Result<ProducerReply, ApiError> {
        let handled: Vec<String> = events
            .into_iter()
            .filter(|event| entry.handles(&event.name))
            .map(|event| event.name)
            .collect();
        if handled.is_empty() {
            return Ok(ProducerReply::Update(UpdateResponse::default()));
        }
        debug!(portlet = %entry.handle, events = ?handled, "producer: events handled");

        self.sessions
            .lock()
            .await
            .entry((partition(entry, user_context).to_string(), entry.handle.clone()))
            .or_default()
            .events
            .extend(handled);

        let markup_context = self.markup(entry, params, user_context, runtime).await?;
        Ok(ProducerReply::Update(UpdateResponse {
            markup_context: Some(markup_context),
            ..UpdateResponse::default()
        }))
    }
}

fn partition<'a>(entry: &PortletEntry, user_context: &'a UserContext) -> &'a str {
    if entry.user_specific {
        &user_context.user_context_key
    } else {
        PUBLIC_PARTITION
    }
}

fn check_params(entry: &PortletEntry, params: &MarkupParams) -> Result<(), ApiError> {
    if !entry.supports_mode(params.mode) {
        return Err(unsupported_mode(entry, params.mode));
    }
    if !entry.supports_window_state(params.window_state) {
        return Err(unsupported_state(entry, params.window_state));
    }
    Ok(())
}

fn unsupported_mode(entry: &PortletEntry, mode: PortletMode) -> ApiError {
    ApiError::new(
        ErrorCode::UnsupportedMode,
        format!("{} does not support mode {mode}", entry.handle),
    )
}

fn unsupported_state(entry: &PortletEntry, state: WindowState) -> ApiError {
    ApiError::new(
        ErrorCode::UnsupportedWindowState,
        format!("{} does not support window state {state}", entry.handle),
    )
}

fn form_value<'a>(form: &'a [NamedString], name: &str) -> Option<&'a str> {
    form.iter()
        .find(|field| field.name == name)
        .map(|field| field.value.as_str())
}

fn render(entry: &PortletEntry, ctx: &RenderContext<'_>) -> String {
    let replacements = [
        ("{handle}", entry.handle.as_str()),
        ("{title}", entry.title.as_str()),
        ("{mode}", ctx.mode.as_str()),
        ("{state}", ctx.window_state.as_str()),
        ("{lang}", ctx.lang),
        ("{user}", ctx.user),
        ("{path}", ctx.path),
        ("{query}", ctx.query),
    ];
    let mut markup = entry.template(ctx.mode).to_string();
    for (placeholder, value) in replacements {
        markup = markup.replace(placeholder, &escape(value));
    }
    markup
}

fn session_markup(session: &PortletSession) -> String {
    let mut out = String::new();
    if !session.form.is_empty() {
        out.push_str("<ul class=\"form\">");
        for field in &session.form {
            out.push_str(&format!(
                "<li>{}={}</li>",
                escape(&field.name),
                escape(&field.value)
            ));
        }
        out.push_str("</ul>");
    }
    if !session.events.is_empty() {
        out.push_str(&format!(
            "<p class=\"events\">events: {}</p>",
            escape(&session.events.join(","))
        ));
    }
    out
}

fn markup_context(entry: &PortletEntry, ctx: &RenderContext<'_>, body: String) -> MarkupContext {
    MarkupContext {
        mime_type: "text/html".to_string(),
        item_string: body,
        locale: Some(ctx.lang.to_string()),
        cache_control: entry
            .expires_secs
            .map(|expires_secs| CacheControl { expires_secs }),
    }
}

pub fn fault_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidHandle => StatusCode::NOT_FOUND,
        ErrorCode::InvalidRegistration | ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
        ErrorCode::InvalidUserCategory
        | ErrorCode::MissingParameters
        | ErrorCode::UnsupportedMode
        | ErrorCode::UnsupportedWindowState
        | ErrorCode::UnsupportedLocale => StatusCode::BAD_REQUEST,
        ErrorCode::OperationFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fault_response(err: ApiError) -> (StatusCode, Json<ProducerReply>) {
    (fault_status(err.code), Json(ProducerReply::Fault(err)))
}

pub fn build_router(state: Arc<ProducerState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/wsrp", post(wsrp))
        .route("/portlets/:handle", get(get_portlet))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn wsrp(
    State(state): State<Arc<ProducerState>>,
    Json(request): Json<ProducerRequest>,
) -> Result<Json<ProducerReply>, (StatusCode, Json<ProducerReply>)> {
    let operation = request.operation();
    let portlet = request.portlet_handle().map(str::to_string);
    state.handle(request).await.map(Json).map_err(|err| {
        warn!(operation, portlet = ?portlet, %err, "producer: fault");
        fault_response(err)
    })
}

/// Markup over the plain framing: mode, state, user and locale arrive as headers.
async fn get_portlet(
    State(state): State<Arc<ProducerState>>,
    Path(handle): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<ProducerReply>)> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let entry = state.portlet(&handle).map_err(fault_response)?;
    if !entry.method_get_supported {
        return Err(fault_response(ApiError::new(
            ErrorCode::AccessDenied,
            format!("{handle} does not accept GET requests"),
        )));
    }

    let params = MarkupParams {
        mode: header(CLOUBER_MODE)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default(),
        window_state: header(CLOUBER_STATE)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default(),
        locales: header(CLOUBER_LANG).into_iter().collect(),
    };
    let user_id = header(CLOUBER_USER);
    let user_context = UserContext {
        user_context_key: user_id.clone().unwrap_or_else(|| "anonymous".to_string()),
        user_id,
    };
    let runtime = RuntimeContext {
        attributes: Vec::new(),
        query_string: query.unwrap_or_default(),
    };

    let markup = state
        .markup(entry, &params, &user_context, &runtime)
        .await
        .map_err(fault_response)?;
    let lang = markup.locale.unwrap_or_else(|| "en".to_string());
    Ok((
        [
            ("content-type", "text/html; charset=utf-8".to_string()),
            (CLOUBER_LANG, lang),
        ],
        markup.item_string,
    ))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
