//! HTTP gateway for Switchboard.
//!
//! Serves the v1 chat API plus a health check. Built on Axum; caller
//! identity is supplied by an upstream authenticator in `X-User-Id`.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use switchboard_config::{AppConfig, GatewayConfig};
use switchboard_core::ProviderFamily;
use switchboard_core::ledger::AllowanceLedger;
use switchboard_core::store::{ConversationStore, ProfileStore, UsageSink};
use switchboard_orchestrator::ChatOrchestrator;
use switchboard_providers::ProviderRegistry;
use switchboard_router::IntentRouter;
use switchboard_store::SqliteStore;
use switchboard_telemetry::{UsageRecorder, pricing_from_config};

pub use api_v1::{ApiV1State, SharedApiState, USER_ID_HEADER, UserId};

/// Chat histories can be long; 2 MB covers them with headroom.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - Request body size limit
/// - CORS for the configured origins (any origin when none are set)
/// - HTTP trace logging
pub fn build_router(state: SharedApiState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| {
                o.parse()
                    .inspect_err(|_| warn!(origin = %o, "Ignoring invalid CORS origin"))
                    .ok()
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Wire the full pipeline over one store.
///
/// The store backs the ledger, conversations, profiles and usage log.
/// Document search embeds queries with the OpenAI provider when one is
/// registered.
pub fn build_state<S>(
    config: &AppConfig,
    store: Arc<S>,
    registry: ProviderRegistry,
) -> Result<SharedApiState, Box<dyn std::error::Error>>
where
    S: AllowanceLedger + ConversationStore + ProfileStore + UsageSink + 'static,
{
    let ledger: Arc<dyn AllowanceLedger> = store.clone();
    let conversations: Arc<dyn ConversationStore> = store.clone();
    let profiles: Arc<dyn ProfileStore> = store.clone();
    let usage: Arc<dyn UsageSink> = store;

    let router = IntentRouter::from_config(config, registry.clone())?;
    let assembler = switchboard_enrich::build_from_config(config, profiles, registry.get(ProviderFamily::OpenAi))?;
    let recorder = UsageRecorder::new(usage.clone(), Arc::new(pricing_from_config(config)));

    let orchestrator = ChatOrchestrator::new(
        ledger.clone(),
        router,
        assembler,
        registry,
        conversations.clone(),
        recorder,
    )
    .with_default_temperature(config.default_temperature);

    Ok(Arc::new(ApiV1State {
        orchestrator,
        ledger,
        conversations,
        usage,
        initial_grant: config.ledger.initial_grant,
    }))
}

/// Open the configured database, build providers from their API keys and
/// serve until the process is stopped.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = config.ledger.resolved_database_path();
    let store = SqliteStore::open(&db_path, config.ledger.initial_grant).await?;
    info!(path = %db_path.display(), "Opened store");

    let registry = switchboard_providers::build_from_config(&config)?;
    info!(families = ?registry.families(), "Providers registered");

    let state = build_state(&config, Arc::new(store), registry)?;

    // Load the BPE tables now rather than inside the first turn
    tokio::task::spawn_blocking(switchboard_telemetry::warm_up_tokenizers).await?;
    info!("Tokenizers loaded");

    serve(state, &config.gateway).await
}

/// Serve an already-built state until the process is stopped.
pub async fn serve(state: SharedApiState, config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let (state, _) = api_v1::tests::test_api_state(100);
        let app = build_router(state, &GatewayConfig::default());

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn v1_is_nested_and_cors_answers_preflight() {
        let (state, _) = api_v1::tests::test_api_state(100);
        let config = GatewayConfig {
            cors_origins: vec!["https://chat.example.com".into()],
            ..GatewayConfig::default()
        };
        let app = build_router(state, &config);

        let req = Request::builder()
            .method("OPTIONS")
            .uri("/v1/chat/stream")
            .header("origin", "https://chat.example.com")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://chat.example.com"
        );

        let req = Request::builder()
            .uri("/v1/account")
            .header(USER_ID_HEADER, "erin")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn builds_state_from_default_config() {
        let store = Arc::new(switchboard_store::InMemoryStore::new(7));
        let config = AppConfig {
            ledger: switchboard_config::LedgerConfig {
                initial_grant: 7,
                ..Default::default()
            },
            ..AppConfig::default()
        };
        let state = build_state(&config, store, ProviderRegistry::new()).unwrap();
        assert_eq!(state.initial_grant, 7);

        let app = build_router(state, &config.gateway);
        let req = Request::builder()
            .uri("/v1/history")
            .header(USER_ID_HEADER, "frank")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
    }
}
