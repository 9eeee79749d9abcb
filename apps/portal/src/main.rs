use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use portal_core::{
    compose::compose_error_page, HttpProducerTransport, PageController, PortalSession,
    RequestEnvelope, StaticDirectory,
};
use shared::domain::DEFAULT_PRODUCER;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod settings;

#[derive(Parser, Debug)]
#[command(about = "Aggregates portlet markup from remote producers into one page")]
struct Args {
    /// Page layout, producers and `[settings]`.
    #[arg(long, default_value = "portal.toml")]
    config: PathBuf,
    /// Navigation fragment, e.g. `#!demo/home&CLOUBER_LANG=fr`.
    #[arg(long, default_value = "")]
    fragment: String,
    #[arg(long)]
    user: Option<String>,
    /// Interaction target as `portletID@producer`.
    #[arg(long)]
    target: Option<String>,
    #[arg(long = "event")]
    events: Vec<String>,
    /// Form parameter as `name=value`.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))
}

impl Args {
    fn envelope(&self) -> Option<RequestEnvelope> {
        if self.target.is_none() && self.events.is_empty() && self.params.is_empty() {
            return None;
        }
        let mut envelope = RequestEnvelope::new();
        if let Some(target) = &self.target {
            envelope = envelope.with_raw_target(target.clone());
        }
        for event in &self.events {
            envelope = envelope.with_event(event.clone());
        }
        for (name, value) in &self.params {
            envelope = envelope.with_parameter(name.clone(), value.clone());
        }
        Some(envelope)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let (portal, settings) = settings::load(&args.config)?;
    let mut directory = StaticDirectory::from_endpoints(&portal.producers)?;
    if !directory.contains(DEFAULT_PRODUCER) {
        let local = HttpProducerTransport::new(&settings.local_producer_url)?;
        info!(url = %settings.local_producer_url, "using local producer");
        directory.insert(DEFAULT_PRODUCER, Arc::new(local));
    }

    let session = PortalSession::new(
        Arc::new(portal),
        settings,
        Arc::new(directory),
        args.user.clone(),
    );
    let controller = PageController::new(session);

    if let Err(err) = controller.navigate(&args.fragment).await {
        error!(fragment = %args.fragment, error = %err, "navigation failed");
        println!("{}", compose_error_page(&err.to_string()));
        return Err(err.into());
    }

    if let Some(envelope) = args.envelope() {
        let report = controller.handle_request(envelope).await?;
        for (portlet, failure) in &report.failures {
            error!(%portlet, %failure, "portlet failed");
        }
        info!(
            updated = report.updated.len(),
            failures = report.failures.len(),
            "request cycle finished"
        );
    }

    println!("{}", controller.compose_page().await);
    Ok(())
}
