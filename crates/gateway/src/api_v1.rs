//! HTTP API v1.
//!
//! Endpoints (all require the `X-User-Id` header):
//!
//! - `POST /v1/chat/stream` - Run a chat turn, receive an SSE stream
//! - `GET  /v1/history`     - The caller's active conversation
//! - `GET  /v1/account`     - The caller's credit balance
//! - `GET  /v1/usage`       - The caller's monthly usage

use axum::{
    Router,
    extract::{FromRequestParts, Query, State},
    http::{StatusCode, request::Parts},
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use switchboard_core::ledger::AllowanceLedger;
use switchboard_core::message::{Message, Role};
use switchboard_core::store::{ConversationStore, MonthlyUsage, UsageRecord, UsageSink};
use switchboard_orchestrator::{ChatEvent, ChatOrchestrator, ChatRequest};
use switchboard_telemetry::format_cost_display;

/// Header carrying the authenticated caller, set by the upstream proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

const MAX_USER_ID_LEN: usize = 128;
const MAX_RECENT_USAGE: usize = 100;

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub orchestrator: ChatOrchestrator,
    pub ledger: Arc<dyn AllowanceLedger>,
    pub conversations: Arc<dyn ConversationStore>,
    pub usage: Arc<dyn UsageSink>,
    /// Balance reported for users the ledger has not seen yet
    pub initial_grant: i64,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream_handler))
        .route("/history", get(history_handler))
        .route("/account", get(account_handler))
        .route("/usage", get(usage_handler))
        .with_state(state)
}

// ── Identity ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

/// The caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match value {
            Some(id) if id.len() <= MAX_USER_ID_LEN => Ok(UserId(id.to_string())),
            Some(_) => Err(api_error(StatusCode::BAD_REQUEST, "user id too long")),
            None => {
                warn!(path = %parts.uri.path(), "Request without user identity");
                Err(api_error(StatusCode::UNAUTHORIZED, "missing X-User-Id header"))
            }
        }
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// Map a turn event to its SSE frame. Data frames carry JSON strings so
/// newlines in model output survive framing.
fn to_sse(event: ChatEvent) -> SseEvent {
    let name = event.event_type();
    match event {
        ChatEvent::KeepAlive => SseEvent::default().comment("keep-alive"),
        ChatEvent::Routing { category, model } => SseEvent::default()
            .event(name)
            .data(serde_json::json!({ "category": category, "model": model }).to_string()),
        ChatEvent::Delta { content } => {
            SseEvent::default().data(serde_json::to_string(&content).unwrap_or_default())
        }
        ChatEvent::Error { message } => SseEvent::default()
            .data(serde_json::to_string(&format!("[ERROR] {message}")).unwrap_or_default()),
        ChatEvent::Done => SseEvent::default().event(name).data("[DONE]"),
    }
}

/// `POST /v1/chat/stream` - Run a turn and stream it back as SSE.
///
/// Once the request is accepted the status is always 200; failures arrive
/// as an `[ERROR]` data frame followed by the `done` event.
async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    UserId(user_id): UserId,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if payload.history.last().map(|m| m.role) != Some(Role::User) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "history must end with a user message",
        ));
    }

    info!(
        user_id = %user_id,
        model = %payload.model,
        turns = payload.history.len(),
        search_web = payload.search_web,
        search_docs = payload.search_docs,
        "v1/chat/stream request"
    );

    let rx = state.orchestrator.start(user_id, payload);
    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── History ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

/// `GET /v1/history`
async fn history_handler(
    State(state): State<SharedApiState>,
    UserId(user_id): UserId,
) -> Result<Json<HistoryResponse>, ApiError> {
    let messages = state
        .conversations
        .load_conversation(&user_id)
        .await
        .map_err(|e| {
            warn!(user_id = %user_id, error = %e, "History lookup failed");
            api_error(StatusCode::SERVICE_UNAVAILABLE, "history unavailable")
        })?;
    Ok(Json(HistoryResponse { messages }))
}

// ── Account ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub credits: i64,
    pub credits_used: i64,
    pub unlimited: bool,
}

/// `GET /v1/account`
async fn account_handler(
    State(state): State<SharedApiState>,
    UserId(user_id): UserId,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.balance(&user_id).await.map_err(|e| {
        warn!(user_id = %user_id, error = %e, "Balance lookup failed");
        api_error(StatusCode::SERVICE_UNAVAILABLE, "service temporarily unavailable")
    })?;

    Ok(Json(match account {
        Some(a) => AccountResponse {
            user_id: a.user_id,
            credits: a.credits,
            credits_used: a.credits_used,
            unlimited: a.unlimited,
        },
        None => AccountResponse {
            user_id,
            credits: state.initial_grant,
            credits_used: 0,
            unlimited: false,
        },
    }))
}

// ── Usage ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UsageQuery {
    #[serde(default)]
    recent: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonthDto {
    pub month: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_cents: i64,
    pub cost_display: String,
}

impl From<MonthlyUsage> for MonthDto {
    fn from(m: MonthlyUsage) -> Self {
        Self {
            cost_display: format_cost_display(m.cost_cents),
            month: m.month,
            requests: m.requests,
            input_tokens: m.input_tokens,
            output_tokens: m.output_tokens,
            cost_cents: m.cost_cents,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    pub months: Vec<MonthDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent: Vec<UsageRecord>,
}

/// `GET /v1/usage[?recent=N]`
async fn usage_handler(
    State(state): State<SharedApiState>,
    UserId(user_id): UserId,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, ApiError> {
    let unavailable = |e: switchboard_core::error::StoreError| {
        warn!(error = %e, "Usage lookup failed");
        api_error(StatusCode::SERVICE_UNAVAILABLE, "usage unavailable")
    };

    let months = state.usage.monthly_usage(&user_id).await.map_err(unavailable)?;
    let recent = match query.recent.min(MAX_RECENT_USAGE) {
        0 => Vec::new(),
        n => state.usage.recent_usage(&user_id, n).await.map_err(unavailable)?,
    };

    Ok(Json(UsageResponse {
        months: months.into_iter().map(MonthDto::from).collect(),
        recent,
    }))
}
