use axum::{
    extract::State,
    http::HeaderValue,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::{CorsConfig, RateLimitConfig};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /health: liveness plus current connection counts.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "chat": {
            "online_users": state.chat_registry.online_users(),
            "connections": state.chat_registry.connection_count(),
        },
        "notifications": {
            "online_users": state.notification_registry.online_users(),
            "connections": state.notification_registry.connection_count(),
        },
    }))
}

/// Build the CORS layer: mirror any origin, or only the trusted list.
/// Credentials are allowed in both modes so the token cookie is sent.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allow_all {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = config
            .origins()
            .into_iter()
            .filter_map(|o| match HeaderValue::from_str(&o) {
                Ok(value) if o != "*" => Some(value),
                _ => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState, cors: &CorsConfig, rate_limit: &RateLimitConfig) -> Router {
    // Per-IP limit on hub handshakes.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = GovernorConfigBuilder::default()
        .key_extractor(PeerIpKeyExtractor)
        .per_second(rate_limit.replenish_secs.max(1))
        .burst_size(rate_limit.burst.max(1))
        .finish()
        .map(Arc::new);

    let mut hub_routes = Router::new()
        .route("/chatHub", get(ws_handler::chat_hub))
        .route("/notificationHub", get(ws_handler::notification_hub));

    match governor_config {
        Some(governor_config) => {
            // Spawn background task to clean up rate limiter state
            let limiter = governor_config.limiter().clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    limiter.retain_recent();
                }
            });
            hub_routes = hub_routes.layer(GovernorLayer {
                config: governor_config,
            });
        }
        None => tracing::warn!("Invalid rate limit settings, hub handshakes are not rate limited"),
    }

    Router::new()
        .route("/health", get(health))
        .merge(hub_routes)
        .layer(cors_layer(cors))
        .with_state(state)
}
