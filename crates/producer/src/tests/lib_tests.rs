use axum::{body, body::Body, http::Request};
use shared::protocol::{EventParams, InteractionParams, PortletContext};
use tower::ServiceExt;

use super::*;

fn test_app() -> (Router, Arc<ProducerState>) {
    let state = Arc::new(ProducerState::new(Catalog::builtin()));
    (build_router(state.clone(), 64 * 1024), state)
}

fn user(key: &str, id: &str) -> UserContext {
    UserContext {
        user_context_key: key.to_string(),
        user_id: Some(id.to_string()),
    }
}

fn params(mode: PortletMode, window_state: WindowState) -> MarkupParams {
    MarkupParams {
        mode,
        window_state,
        locales: vec!["fr".to_string()],
    }
}

fn runtime(path: &str, query: &str) -> RuntimeContext {
    RuntimeContext {
        attributes: vec![NamedString::new(CLOUBER_PATH, path)],
        query_string: query.to_string(),
    }
}

fn get_markup(
    registration: Option<&RegistrationContext>,
    handle: &str,
    user_context: UserContext,
    mode: PortletMode,
) -> ProducerRequest {
    ProducerRequest::GetMarkup {
        registration_context: registration.cloned(),
        portlet_context: PortletContext {
            portlet_handle: handle.to_string(),
        },
        runtime_context: runtime("demo/home", "city=Lyon"),
        user_context,
        markup_params: params(mode, WindowState::Normal),
        use_get: false,
    }
}

fn interaction(
    registration: &RegistrationContext,
    handle: &str,
    user_context: UserContext,
    form: &[(&str, &str)],
) -> ProducerRequest {
    ProducerRequest::PerformBlockingInteraction {
        registration_context: Some(registration.clone()),
        portlet_context: PortletContext {
            portlet_handle: handle.to_string(),
        },
        runtime_context: runtime("demo/home", ""),
        user_context,
        markup_params: params(PortletMode::View, WindowState::Normal),
        interaction_params: InteractionParams {
            form_parameters: form
                .iter()
                .map(|(name, value)| NamedString::new(*name, *value))
                .collect(),
        },
    }
}

async fn call(app: &Router, request: &ProducerRequest) -> (StatusCode, ProducerReply) {
    let request = Request::post("/wsrp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(request).expect("json")))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("reply"))
}

async fn register(app: &Router) -> RegistrationContext {
    let request = ProducerRequest::Register {
        registration_data: RegistrationData {
            consumer_name: "portal".to_string(),
            consumer_agent: "portal/0.1".to_string(),
            method_get_supported: true,
            consumer_modes: PortletMode::ALL.to_vec(),
            consumer_window_states: WindowState::ALL.to_vec(),
        },
        lifetime: None,
        user_context: user("ctx-a", "alice"),
    };
    let (status, reply) = call(app, &request).await;
    assert_eq!(status, StatusCode::OK);
    let ProducerReply::Registration(state) = reply else {
        panic!("expected registration, got {reply:?}");
    };
    RegistrationContext {
        registration_handle: state.registration_handle,
    }
}

fn markup_of(reply: ProducerReply) -> MarkupContext {
    match reply {
        ProducerReply::Markup(response) => response.markup_context,
        ProducerReply::Update(UpdateResponse {
            markup_context: Some(markup),
            ..
        }) => markup,
        other => panic!("expected markup, got {other:?}"),
    }
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (app, _state) = test_app();
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn service_description_lists_catalog_without_registration() {
    let (app, _state) = test_app();
    let request = ProducerRequest::GetServiceDescription {
        registration_context: None,
        desired_locales: vec!["en".to_string()],
        portlet_handles: Vec::new(),
        user_context: user("ctx-a", "alice"),
    };

    let (status, reply) = call(&app, &request).await;

    assert_eq!(status, StatusCode::OK);
    let ProducerReply::ServiceDescription(description) = reply else {
        panic!("expected description, got {reply:?}");
    };
    assert!(description.requires_registration);
    let handles: Vec<&str> = description
        .offered_portlets
        .iter()
        .map(|portlet| portlet.portlet_handle.as_str())
        .collect();
    assert_eq!(handles, vec!["news", "weather", "poll"]);
}

#[tokio::test]
async fn markup_requires_a_known_registration() {
    let (app, state) = test_app();

    let (status, reply) = call(
        &app,
        &get_markup(None, "news", user("ctx-a", "alice"), PortletMode::View),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(matches!(
        reply,
        ProducerReply::Fault(ApiError {
            code: ErrorCode::InvalidRegistration,
            ..
        })
    ));

    let forged = RegistrationContext {
        registration_handle: "reg-999".to_string(),
    };
    let (status, _) = call(
        &app,
        &get_markup(Some(&forged), "news", user("ctx-a", "alice"), PortletMode::View),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(state.registration_count().await, 0);
}

#[tokio::test]
async fn registration_handles_are_distinct() {
    let (app, state) = test_app();
    let first = register(&app).await;
    let second = register(&app).await;

    assert_ne!(first, second);
    assert_eq!(state.registration_count().await, 2);
}

#[tokio::test]
async fn markup_substitutes_request_context() {
    let (app, _state) = test_app();
    let registration = register(&app).await;

    let (status, reply) = call(
        &app,
        &get_markup(Some(&registration), "news", user("ctx-a", "alice"), PortletMode::View),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let markup = markup_of(reply);
    assert_eq!(markup.item_string, "<h2>News</h2><p>Headlines for alice (fr)</p>");
    assert_eq!(markup.locale.as_deref(), Some("fr"));
    assert_eq!(markup.cache_control, None);

    let (_, reply) = call(
        &app,
        &get_markup(Some(&registration), "weather", user("ctx-a", "alice"), PortletMode::View),
    )
    .await;
    let markup = markup_of(reply);
    assert_eq!(markup.item_string, "<h2>Weather</h2><p>Forecast city=Lyon</p>");
    assert_eq!(markup.cache_control, Some(CacheControl { expires_secs: 60 }));
}

#[tokio::test]
async fn unknown_portlet_and_unsupported_mode_are_faults() {
    let (app, _state) = test_app();
    let registration = register(&app).await;

    let (status, reply) = call(
        &app,
        &get_markup(Some(&registration), "ghost", user("ctx-a", "alice"), PortletMode::View),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(matches!(
        reply,
        ProducerReply::Fault(ApiError {
            code: ErrorCode::InvalidHandle,
            ..
        })
    ));

    let (status, reply) = call(
        &app,
        &get_markup(Some(&registration), "weather", user("ctx-a", "alice"), PortletMode::Edit),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        reply,
        ProducerReply::Fault(ApiError {
            code: ErrorCode::UnsupportedMode,
            ..
        })
    ));
}

#[tokio::test]
async fn interaction_form_is_escaped_and_remembered() {
    let (app, _state) = test_app();
    let registration = register(&app).await;

    let (status, reply) = call(
        &app,
        &interaction(&registration, "news", user("ctx-a", "alice"), &[("q", "<b>rust</b>")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let markup = markup_of(reply);
    assert!(markup
        .item_string
        .ends_with("<ul class=\"form\"><li>q=&lt;b&gt;rust&lt;/b&gt;</li></ul>"));

    let (_, reply) = call(
        &app,
        &get_markup(Some(&registration), "news", user("ctx-b", "bob"), PortletMode::View),
    )
    .await;
    assert!(markup_of(reply).item_string.contains("q=&lt;b&gt;rust"));
}

#[tokio::test]
async fn user_specific_portlets_keep_state_per_user() {
    let (app, state) = test_app();
    let registration = register(&app).await;

    call(
        &app,
        &interaction(&registration, "poll", user("ctx-a", "alice"), &[("choice", "helix")]),
    )
    .await;

    let (_, reply) = call(
        &app,
        &get_markup(Some(&registration), "poll", user("ctx-b", "bob"), PortletMode::View),
    )
    .await;
    assert!(!markup_of(reply).item_string.contains("helix"));
    assert!(state.session("ctx-a", "poll").await.is_some());
    assert!(state.session(PUBLIC_PARTITION, "poll").await.is_none());
}

#[tokio::test]
async fn deferred_interaction_reports_new_mode_without_markup() {
    let (app, _state) = test_app();
    let registration = register(&app).await;

    let (status, reply) = call(
        &app,
        &interaction(
            &registration,
            "poll",
            user("ctx-a", "alice"),
            &[(NEW_MODE_FIELD, "edit"), (DEFER_RENDER_FIELD, "true")],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        reply,
        ProducerReply::Update(UpdateResponse {
            markup_context: None,
            new_mode: Some(PortletMode::Edit),
            new_window_state: None,
        })
    );
}

#[tokio::test]
async fn interaction_cannot_switch_to_unsupported_state() {
    let (app, _state) = test_app();
    let registration = register(&app).await;

    let (status, reply) = call(
        &app,
        &interaction(
            &registration,
            "weather",
            user("ctx-a", "alice"),
            &[(NEW_WINDOW_STATE_FIELD, "maximized")],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        reply,
        ProducerReply::Fault(ApiError {
            code: ErrorCode::UnsupportedWindowState,
            ..
        })
    ));
}

#[tokio::test]
async fn only_handled_events_produce_markup() {
    let (app, _state) = test_app();
    let registration = register(&app).await;
    let events = |handle: &str, names: &[&str]| ProducerRequest::HandleEvents {
        registration_context: Some(registration.clone()),
        portlet_context: PortletContext {
            portlet_handle: handle.to_string(),
        },
        runtime_context: runtime("demo/home", ""),
        user_context: user("ctx-a", "alice"),
        markup_params: params(PortletMode::View, WindowState::Normal),
        event_params: EventParams {
            events: names.iter().map(|name| Event::named(*name)).collect(),
            extensions: Vec::new(),
        },
    };

    let (_, reply) = call(&app, &events("news", &["refresh", "voted"])).await;
    assert!(markup_of(reply)
        .item_string
        .ends_with("<p class=\"events\">events: refresh</p>"));

    let (status, reply) = call(&app, &events("poll", &["refresh"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, ProducerReply::Update(UpdateResponse::default()));
}

#[tokio::test]
async fn get_framing_reads_headers() {
    let (app, _state) = test_app();
    let request = Request::get("/portlets/news?page=2")
        .header(CLOUBER_MODE, "help")
        .header(CLOUBER_STATE, "maximized")
        .header(CLOUBER_USER, "carol")
        .header(CLOUBER_LANG, "de")
        .body(Body::empty())
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CLOUBER_LANG)
            .and_then(|value| value.to_str().ok()),
        Some("de")
    );
    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(
        body.as_ref(),
        b"<p>Send the refresh event to reload headlines.</p>"
    );
}

#[tokio::test]
async fn get_framing_is_refused_for_post_only_portlets() {
    let (app, _state) = test_app();
    let request = Request::get("/portlets/poll")
        .body(Body::empty())
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let (app, _state) = test_app();
    let payload = "x".repeat(128 * 1024);
    let request = Request::post("/wsrp")
        .header("content-type", "application/json")
        .header("content-length", payload.len().to_string())
        .body(Body::from(payload))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
