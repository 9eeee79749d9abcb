use std::{net::SocketAddr, sync::Arc};

use producer::{
    build_router,
    catalog::Catalog,
    config::{catalog_exists, load_settings},
    ProducerState,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let catalog = match settings.catalog_path.as_deref() {
        Some(path) if catalog_exists(&settings) => Catalog::load(path)?,
        Some(path) => {
            error!(%path, "catalog file not found; check PRODUCER_CATALOG");
            anyhow::bail!("catalog file '{path}' does not exist");
        }
        None => Catalog::builtin(),
    };
    info!(
        portlets = catalog.portlets.len(),
        requires_registration = catalog.requires_registration,
        "catalog loaded"
    );

    let app = build_router(Arc::new(ProducerState::new(catalog)), settings.max_body_bytes);

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "producer listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
