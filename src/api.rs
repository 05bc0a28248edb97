//! REST API server for the stock chat
//!
//! Exposes the chat loop, streamed replies, page summaries and the price
//! table over HTTP. Every JSON reply uses the `ApiResponse` envelope.

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::ChatOrchestrator;
use crate::config::{BasicAuth, ProviderKind};
use crate::error::ChatError;
use crate::fetcher::ContentFetcher;
use crate::llm::{ModelClient, ModelClients};
use crate::media::{self, MediaClient};
use crate::models::{Conversation, PriceRecord};
use crate::store::{normalize_symbol, PriceStore};
use crate::summarizer::PageSummarizer;
use crate::tools::ToolRegistry;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub history: Conversation,
    pub message: String,
    /// `openai`, `anthropic` or `gemini`; the configured default when absent
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub url: String,
    /// Named in the prompt when present
    #[serde(default)]
    pub company_name: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PriceUpdate {
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub history: Conversation,
    pub touched: Vec<String>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Client errors say what was wrong; server-side failures get the user-facing apology
    fn failure(status: StatusCode, error: &ChatError) -> Self {
        let message = if status.is_client_error() {
            error.to_string()
        } else {
            error.user_message().to_string()
        };

        let mut response = Self::error(message);
        if let Some(history) = error.partial_history() {
            response.data = Some(serde_json::json!({ "history": history }));
        }
        response
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn status_for(error: &ChatError) -> StatusCode {
    match error {
        ChatError::InvalidPrice(_)
        | ChatError::InvalidSymbol(_)
        | ChatError::MalformedToolArguments { .. }
        | ChatError::ArgumentValidationFailed { .. } => StatusCode::BAD_REQUEST,
        ChatError::FetchError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ChatError::ProviderUnavailable(_)
        | ChatError::HttpError(_)
        | ChatError::ProtocolViolation(_)
        | ChatError::ToolLoopExceeded { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fail(error: ChatError) -> ApiResult {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(%status, "Request failed: {}", error);
    }
    (status, Json(ApiResponse::failure(status, &error)))
}

fn bad_request(message: impl Into<String>) -> ApiResult {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message.into())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub clients: Arc<ModelClients>,
    pub registry: Arc<ToolRegistry>,
    pub store: Arc<dyn PriceStore>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub media: Option<Arc<dyn MediaClient>>,
    pub max_tool_iterations: u32,
    pub basic_auth: Option<BasicAuth>,
}

impl ApiState {
    fn client_for(&self, provider: Option<&str>) -> Result<Arc<dyn ModelClient>, ApiResult> {
        let kind = match provider.map(str::trim).filter(|p| !p.is_empty()) {
            Some(name) => Some(
                ProviderKind::parse(name)
                    .ok_or_else(|| bad_request(format!("Unknown provider: {}", name)))?,
            ),
            None => None,
        };
        self.clients.get(kind).map_err(fail)
    }

    fn orchestrator(&self, client: Arc<dyn ModelClient>) -> ChatOrchestrator {
        ChatOrchestrator::new(client, self.registry.clone(), self.max_tool_iterations)
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let providers: Vec<String> = state
        .clients
        .available()
        .iter()
        .map(|p| p.to_string())
        .collect();

    Json(serde_json::json!({
        "status": "healthy",
        "providers": providers,
        "tools": state.registry.len(),
        "media": state.media.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    if let Err(e) = req.history.validate_pairing() {
        return bad_request(format!("Invalid history: {}", e));
    }

    let client = match state.client_for(req.provider.as_deref()) {
        Ok(client) => client,
        Err(response) => return response,
    };

    info!(model = %client.model(), history_len = req.history.len(), "Received chat request");

    let outcome = match state.orchestrator(client).run_turn(req.history, &req.message).await {
        Ok(outcome) => outcome,
        Err(e) => return fail(e),
    };

    let enrichment = match &state.media {
        Some(media) => media::enrich(media.as_ref(), &outcome).await,
        None => media::Enrichment::default(),
    };

    let reply = ChatReply {
        audio_base64: enrichment.audio_base64(),
        image_base64: enrichment.image_base64(),
        reply: outcome.final_text,
        history: outcome.history,
        touched: outcome.touched,
        iterations: outcome.iterations,
    };

    (StatusCode::OK, Json(ApiResponse::success(reply)))
}

/// Fragments are JSON strings so carriage returns and newlines survive the SSE framing
fn fragment_event(text: &str) -> Event {
    Event::default()
        .event("fragment")
        .json_data(text)
        .unwrap_or_else(|e| error_event(&format!("unencodable fragment: {}", e)))
}

fn error_event(message: &str) -> Event {
    Event::default().event("error").data(message.replace(['\r', '\n'], " "))
}

fn done_event(payload: serde_json::Value) -> Event {
    Event::default().event("done").data(payload.to_string())
}

/// SSE: `fragment` events, then one `done` event carrying the updated history
async fn chat_stream_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Response {
    if let Err(e) = req.history.validate_pairing() {
        return bad_request(format!("Invalid history: {}", e)).into_response();
    }

    let client = match state.client_for(req.provider.as_deref()) {
        Ok(client) => client,
        Err(response) => return response.into_response(),
    };

    let mut turn = match state
        .orchestrator(client)
        .stream_turn(req.history, &req.message)
        .await
    {
        Ok(turn) => turn,
        Err(e) => return fail(e).into_response(),
    };

    let events = async_stream::stream! {
        while let Some(fragment) = turn.next_fragment().await {
            match fragment {
                Ok(text) => yield Ok::<_, Infallible>(fragment_event(&text)),
                Err(e) => {
                    yield Ok(error_event(e.user_message()));
                    return;
                }
            }
        }

        match turn.finish() {
            Ok(history) => yield Ok(done_event(serde_json::json!({ "history": history }))),
            Err(e) => yield Ok(error_event(e.user_message())),
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// =============================
/// Summary Endpoint
/// =============================

async fn summarize_handler(
    State(state): State<ApiState>,
    Json(req): Json<SummarizeRequest>,
) -> ApiResult {
    let client = match state.client_for(req.provider.as_deref()) {
        Ok(client) => client,
        Err(response) => return response,
    };

    let summarizer = PageSummarizer::new(client, state.fetcher.clone());
    match summarizer
        .summarize(&req.url, req.company_name.as_deref())
        .await
    {
        Ok(summary) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "summary": summary }))),
        ),
        Err(e) => fail(e),
    }
}

/// SSE: `fragment` events, then one `done` event carrying the whole summary
async fn summarize_stream_handler(
    State(state): State<ApiState>,
    Json(req): Json<SummarizeRequest>,
) -> Response {
    let client = match state.client_for(req.provider.as_deref()) {
        Ok(client) => client,
        Err(response) => return response.into_response(),
    };

    let summarizer = PageSummarizer::new(client, state.fetcher.clone());
    let mut fragments = match summarizer
        .summarize_streaming(&req.url, req.company_name.as_deref())
        .await
    {
        Ok(fragments) => fragments,
        Err(e) => return fail(e).into_response(),
    };

    let events = async_stream::stream! {
        let mut summary = String::new();
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    summary.push_str(&text);
                    yield Ok::<_, Infallible>(fragment_event(&text));
                }
                Err(e) => {
                    warn!(url = %req.url, "Summary stream failed: {}", e);
                    yield Ok(error_event(e.user_message()));
                    return;
                }
            }
        }
        yield Ok(done_event(serde_json::json!({ "summary": summary })));
    };

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// =============================
/// Price Endpoints
/// =============================

async fn list_prices(State(state): State<ApiState>) -> ApiResult {
    match state.store.list().await {
        Ok(records) => (StatusCode::OK, Json(ApiResponse::success(records))),
        Err(e) => fail(e),
    }
}

async fn put_price(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(update): Json<PriceUpdate>,
) -> ApiResult {
    let symbol = match normalize_symbol(&name) {
        Ok(symbol) => symbol,
        Err(e) => return fail(e),
    };

    match state.store.upsert(&symbol, update.price).await {
        Ok(()) => {
            info!(symbol = %symbol, price = update.price, "Price updated over HTTP");
            (
                StatusCode::OK,
                Json(ApiResponse::success(PriceRecord {
                    symbol,
                    price: update.price,
                })),
            )
        }
        Err(e) => fail(e),
    }
}

/// =============================
/// Basic Auth
/// =============================

async fn require_basic_auth(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let Some(auth) = &state.basic_auth else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| BASE64.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .map(|credentials| credentials == format!("{}:{}", auth.user, auth.password))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"caishen\"")],
            Json(ApiResponse::error("Authentication required".into())),
        )
            .into_response()
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/summarize", post(summarize_handler))
        .route("/api/summarize/stream", post(summarize_stream_handler))
        .route("/api/prices", get(list_prices))
        .route("/api/prices/:name", put(put_price))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
