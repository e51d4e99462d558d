use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, patch, post},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use cache::Cache;
use config::Config;
use middleware::rate_limit::RateLimiter;
use services::auth_provider::AuthProviderClient;
use services::completion::TextCompletionClient;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub cache: Cache,
    pub config: Arc<Config>,
    pub auth_provider: AuthProviderClient,
    pub completion: Option<TextCompletionClient>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, cache: Cache, config: Config) -> anyhow::Result<Self> {
        let auth_provider = AuthProviderClient::new(&config.auth)?;
        let completion = TextCompletionClient::from_config(&config.ai)?;
        if completion.is_none() {
            tracing::warn!("no AI API key configured, WhatsApp parsing is disabled");
        }
        let rate_limiter =
            RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);
        Ok(Self {
            db,
            cache,
            config: Arc::new(config),
            auth_provider,
            completion,
            rate_limiter,
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    // --- Public routes ---
    let public_routes = Router::new()
        .route("/auth/signup", post(routes::account::signup))
        .route("/invitations/lookup", get(routes::invitations::lookup_invitation))
        .route("/invitations/accept", post(routes::invitations::accept_invitation))
        .route("/calendar/feed/:tenant_id", get(routes::calendar::feed));

    // --- Authenticated, not tenant-scoped ---
    let account_routes = Router::new()
        .route("/me", get(routes::account::me))
        .route("/me/sync", post(routes::account::sync_me))
        .route(
            "/tenants",
            get(routes::tenants::list_my_tenants).post(routes::tenants::create_tenant),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Tenant-scoped (?tenant=slug|id) ---
    let tenant_routes = Router::new()
        .route(
            "/tenant",
            get(routes::tenants::get_tenant).patch(routes::tenants::update_tenant),
        )
        .route("/tenant/members", get(routes::tenants::list_members))
        .route(
            "/tenant/members/:user_id",
            patch(routes::tenants::update_member_role).delete(routes::tenants::remove_member),
        )
        .route(
            "/players",
            get(routes::players::list_players).post(routes::players::create_player),
        )
        .route(
            "/players/:id",
            get(routes::players::get_player)
                .patch(routes::players::update_player)
                .delete(routes::players::delete_player),
        )
        .route(
            "/requests",
            get(routes::requests::list_requests).post(routes::requests::create_request),
        )
        .route("/requests/bulk", post(routes::requests::bulk_create))
        .route("/requests/bulk-status", patch(routes::requests::bulk_update_status))
        .route("/requests/parse-whatsapp", post(routes::requests::parse_whatsapp))
        .route(
            "/requests/:id",
            get(routes::requests::get_request)
                .patch(routes::requests::update_request)
                .delete(routes::requests::delete_request),
        )
        .route(
            "/trials",
            get(routes::trials::list_trials).post(routes::trials::create_trial),
        )
        .route(
            "/trials/:id",
            get(routes::trials::get_trial)
                .patch(routes::trials::update_trial)
                .delete(routes::trials::delete_trial),
        )
        .route(
            "/calendar/events",
            get(routes::calendar::list_events).post(routes::calendar::create_event),
        )
        .route(
            "/calendar/events/:id",
            get(routes::calendar::get_event)
                .patch(routes::calendar::update_event)
                .delete(routes::calendar::delete_event),
        )
        .route("/calendar/feed-url", get(routes::calendar::feed_url))
        .route(
            "/invitations",
            get(routes::invitations::list_invitations).post(routes::invitations::create_invitation),
        )
        .route(
            "/invitations/:id",
            axum::routing::delete(routes::invitations::cancel_invitation),
        )
        .route("/invitations/:id/resend", post(routes::invitations::resend_invitation))
        .route("/dashboard", get(routes::dashboard::stats))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::tenant::resolve_tenant,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Platform administration ---
    let admin_routes = Router::new()
        .route(
            "/tenants",
            get(routes::admin::list_tenants).post(routes::admin::create_tenant),
        )
        .route("/tenants/:id", axum::routing::delete(routes::admin::delete_tenant))
        .route("/users", get(routes::admin::list_users))
        .route("/users/:id/super-admin", patch(routes::admin::set_super_admin))
        .route("/memberships", post(routes::admin::add_membership))
        .route(
            "/memberships/:id",
            axum::routing::delete(routes::admin::remove_membership),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::admin::require_super_admin,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Compose full API ---
    let api = Router::new()
        .merge(public_routes)
        .merge(account_routes)
        .merge(tenant_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api)
        // Global middleware
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodic housekeeping: memory-cache purge, invitation expiry, and
/// rate-limit window pruning.
pub fn spawn_background_tasks(state: &AppState) {
    let cache = state.cache.clone();
    let every = Duration::from_secs(state.config.cache.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "purged expired cache entries");
            }
        }
    });

    services::invitations::spawn_expiry_sweep(
        state.db.clone(),
        Duration::from_secs(state.config.invitations.sweep_interval_secs.max(1)),
    );

    let limiter = state.rate_limiter.clone();
    let window = Duration::from_secs(state.config.rate_limit.window_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        loop {
            ticker.tick().await;
            limiter.prune().await;
        }
    });
}
