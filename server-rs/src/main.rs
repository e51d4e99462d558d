use std::net::SocketAddr;

use anyhow::Context;
use scoutdesk_api::{build_router, cache::Cache, config::Config, db, spawn_background_tasks, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    config.check_secrets().map_err(anyhow::Error::msg)?;

    let pool = db::create_pool(&config)
        .await
        .context("connecting to Postgres")?;
    let cache = Cache::new(&config.cache)
        .await
        .context("connecting to the cache backend")?;
    let port = config.port;
    let env = config.app_env.clone();

    let state = AppState::new(pool, cache, config)?;
    tracing::info!(
        cache = state.cache.backend_name(),
        ai = state.completion.is_some(),
        env = %env,
        "ScoutDesk API initialized"
    );
    spawn_background_tasks(&state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}
