//! HTTP gateway for opsclaw.
//!
//! Serves the run API (synchronous and SSE), run stop/status over the
//! [`registry::RunRegistry`], and the stored sessions. Built on Axum.

pub mod api;
pub mod registry;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use opsclaw_agent::AgentLoop;
use opsclaw_config::AppConfig;
use opsclaw_core::SessionStore;

use crate::api::ErrorResponse;
use crate::registry::RunRegistry;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub agent: Arc<AgentLoop>,
    pub sessions: Arc<dyn SessionStore>,
    pub registry: Arc<RunRegistry>,
}

impl GatewayState {
    pub fn new(config: AppConfig, agent: Arc<AgentLoop>, sessions: Arc<dyn SessionStore>) -> Self {
        let registry = Arc::new(RunRegistry::new(Duration::from_secs(
            config.gateway.finished_run_ttl_secs,
        )));
        Self {
            config,
            agent,
            sessions,
            registry,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router.
///
/// Layers applied:
/// - Bearer token authentication on `/api/*` when `gateway.api_token` is set
/// - CORS for the configured origins (same-origin only when none)
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let api = api::api_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(&state.config.gateway.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
///
/// Builds the provider, SSH executor and session store once and shares them
/// across requests. Fails before binding when the provider is not usable.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = opsclaw_providers::build_from_config(&config)?;
    let executor = Arc::new(opsclaw_tools::SshExecutor::new(
        config.assets.clone(),
        config.ssh.clone(),
    ));
    let db_path = config.session_db_path();
    let sessions: Arc<dyn SessionStore> = Arc::new(
        opsclaw_memory::SqliteSessionStore::new(&db_path.to_string_lossy()).await?,
    );
    let agent = Arc::new(AgentLoop::from_config(provider, executor, &config));

    if config.gateway.api_token.is_none() && config.gateway.host != "127.0.0.1" {
        warn!(host = %config.gateway.host, "Gateway listening beyond localhost without an api_token");
    }

    let state = Arc::new(GatewayState::new(config, agent, sessions));
    let app = build_router(state);

    info!(addr = %addr, db = %db_path.display(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Requires `Authorization: Bearer <gateway.api_token>` when a token is
/// configured; open otherwise.
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = state
        .config
        .gateway
        .api_token
        .as_deref()
        .filter(|t| !t.is_empty())
    else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        return next.run(req).await;
    }
    warn!(path = %req.uri().path(), "Unauthorized API request, missing or invalid bearer token");
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            detail: "未授权".into(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use opsclaw_agent::testing::{RecordingExecutor, ScriptedProvider};
    use opsclaw_memory::InMemorySessionStore;
    use tower::ServiceExt;

    fn test_state(api_token: Option<&str>) -> SharedState {
        let mut config = AppConfig::default();
        config.gateway.api_token = api_token.map(String::from);
        let provider = Arc::new(ScriptedProvider::repeating(
            r#"{"action":"final","message":"状态正常"}"#,
        ));
        let executor = Arc::new(RecordingExecutor::new([("web-01", "ops@10.0.0.1:22")]));
        let agent = Arc::new(AgentLoop::from_config(provider, executor, &config));
        Arc::new(GatewayState::new(
            config,
            agent,
            Arc::new(InMemorySessionStore::new()),
        ))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(None));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn token_guards_api_but_not_health() {
        let app = build_router(test_state(Some("s3cret")));

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(health).await.unwrap().status(), StatusCode::OK);

        let anonymous = Request::builder()
            .uri("/api/sessions")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(anonymous).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let wrong = Request::builder()
            .uri("/api/sessions")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(wrong).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let authed = Request::builder()
            .uri("/api/sessions")
            .header("Authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(authed).await.unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn invalid_cors_origins_are_skipped() {
        let _ = cors_layer(&["http://localhost:5173".into(), "bad\norigin".into()]);
    }
}
