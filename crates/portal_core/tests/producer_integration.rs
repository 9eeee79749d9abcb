use std::sync::Arc;

use portal_core::{
    NavigationOutcome, PageController, PortalConfig, PortalEvent, PortalSession, PortalSettings,
    RequestEnvelope, StaticDirectory,
};
use producer::{build_router, catalog::Catalog, ProducerState};
use shared::domain::{PortletKey, PortletMode};
use tokio::net::TcpListener;

async fn spawn_producer() -> (String, Arc<ProducerState>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = Arc::new(ProducerState::new(Catalog::builtin()));
    let app = build_router(state.clone(), 64 * 1024);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn portal_config(producer_url: &str) -> PortalConfig {
    let raw = format!(
        r#"
default_app = "demo"

[producers.localhost]
url = "{producer_url}"

[[apps]]
name = "demo"
default_page = "home"

[[apps.pages]]
name = "home"

[[apps.pages.frames]]
position = "content"

[[apps.pages.frames.windows]]
portlet_id = "news"
status_bar = true

[[apps.pages.frames.windows]]
portlet_id = "weather"

[[apps.pages]]
name = "vote"

[[apps.pages.frames]]
position = "content"

[[apps.pages.frames.windows]]
portlet_id = "poll"
"#
    );
    PortalConfig::from_toml_str(&raw).expect("portal config")
}

fn controller(producer_url: &str) -> PageController {
    let config = portal_config(producer_url);
    let directory = StaticDirectory::from_endpoints(&config.producers).expect("directory");
    PageController::new(PortalSession::new(
        Arc::new(config),
        PortalSettings::default(),
        Arc::new(directory),
        Some("alice".to_string()),
    ))
}

fn key(portlet_id: &str) -> PortletKey {
    PortletKey::new(portlet_id, "localhost")
}

#[tokio::test]
async fn page_load_registers_once_and_delivers_path_changed() {
    let (url, state) = spawn_producer().await;
    let controller = controller(&url);

    let outcome = controller
        .navigate("#!demo/home&CLOUBER_LANG=fr")
        .await
        .expect("navigate");

    assert!(matches!(outcome, NavigationOutcome::Loaded { .. }));
    assert!(outcome.report().failures.is_empty());
    assert_eq!(state.registration_count().await, 1);

    let session = controller.lock_session().await;
    let news = session.portlet(&key("news")).expect("news");
    let markup = news.markup.as_deref().expect("news markup");
    assert!(markup.starts_with("<h2>News</h2><p>Headlines for alice (fr)</p>"));
    assert!(markup.contains("events: pathChanged"));
    assert!(news.message.is_some());

    let weather = session.portlet(&key("weather")).expect("weather");
    assert!(weather
        .markup
        .as_deref()
        .expect("weather markup")
        .starts_with("<h2>Weather</h2>"));
}

#[tokio::test]
async fn interaction_form_reaches_the_producer() {
    let (url, _state) = spawn_producer().await;
    let controller = controller(&url);
    controller.navigate("#!demo/vote").await.expect("navigate");

    let report = controller
        .handle_request(
            RequestEnvelope::new()
                .with_target(&key("poll"))
                .with_parameter("choice", "helix"),
        )
        .await
        .expect("cycle");

    assert_eq!(report.interaction, Some(key("poll")));
    assert_eq!(report.updated, vec![key("poll")]);
    let session = controller.lock_session().await;
    let markup = session
        .portlet(&key("poll"))
        .and_then(|poll| poll.markup.clone())
        .expect("poll markup");
    assert!(markup.contains("<li>choice=helix</li>"));
}

#[tokio::test]
async fn mode_change_fetches_markup_over_get() {
    let (url, _state) = spawn_producer().await;
    let controller = controller(&url);
    controller.navigate("#!demo/home").await.expect("navigate");
    let mut events = controller.subscribe_events();

    let report = controller
        .change_mode(&key("news"), PortletMode::Help)
        .await
        .expect("cycle");

    assert_eq!(report.rendered, vec![key("news")]);
    assert_eq!(
        events.recv().await.expect("refresh"),
        PortalEvent::Refresh {
            portlets: vec![key("news")]
        }
    );
    let markup = controller
        .lock_session()
        .await
        .portlet(&key("news"))
        .and_then(|news| news.markup.clone())
        .expect("news markup");
    assert!(markup.starts_with("<p>Send the refresh event to reload headlines.</p>"));
}

#[tokio::test]
async fn unreachable_producer_fails_the_page_load() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let controller = controller(&format!("http://{addr}"));
    let mut events = controller.subscribe_events();

    let result = controller.navigate("#!demo/home").await;

    assert!(result.is_err());
    assert!(matches!(
        events.recv().await.expect("page error"),
        PortalEvent::PageError { .. }
    ));
    assert!(controller.lock_session().await.navigation().is_none());
}
