use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subreq::config::Config;
use subreq::middleware::compose;
use subreq::verifier::{IdTokenVerifier, RemoteKeySet};
use subreq::{Handler, Server, terminal};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subreq=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_args()?;

    let keys = RemoteKeySet::new(config.certs_url())
        .context("building key set client")?
        .with_cache_ttl(config.keys_ttl())
        .with_min_refresh_interval(config.keys_refresh_interval());
    info!(url = keys.url(), ttl = ?config.keys_ttl(), "signing keys will be fetched on first use");

    let verifier = IdTokenVerifier::new(config.auth_domain.clone(), config.audience.clone(), Arc::new(keys))
        .with_leeway(config.leeway);
    info!(
        issuer = verifier.issuer(),
        audience = verifier.audience(),
        debug = config.debug,
        "verifier configured"
    );

    let handler = compose(
        &subreq::pipeline(&config, Arc::new(verifier)),
        terminal::no_content.into_boxed_handler(),
    );

    let server = Server::bind(config.socket_addr())
        .await
        .with_context(|| format!("binding {}", config.socket_addr()))?;
    server.serve(handler).await.context("serving")?;
    Ok(())
}
