//! HTTP server for the travel guide.
//!
//! Exposes itinerary generation and the retrieval-backed "more details"
//! flow as JSON endpoints. CORS is permissive so a browser front end can
//! call it directly.
//!
//! # Endpoints
//!
//! | Method | Path                      | Description                                    |
//! |--------|---------------------------|------------------------------------------------|
//! | GET    | `/health`                 | Liveness plus retrieval state                  |
//! | POST   | `/itinerary`              | Structured trip form → itinerary               |
//! | POST   | `/itinerary/free`         | Free-text request → itinerary                  |
//! | POST   | `/details`                | Grounded answer; recorded in session history   |
//! | GET    | `/sessions/{id}/history`  | Recorded turns for a session                   |
//! | DELETE | `/sessions/{id}/history`  | Forget a session                               |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "Too many requests right now..." } }
//! ```
//!
//! Rate limits map to `429`, an unavailable retrieval chain to `503`,
//! invalid input to `400`, and provider failures to `502`.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use travel_guide_core::history::ConversationHistory;
use travel_guide_core::models::Turn;

use crate::config::Config;
use crate::error::{ItineraryError, RagError};
use crate::itinerary::{ItineraryGenerator, TripRequest};
use crate::rag::{details_query, RagService};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<RagService>,
    pub itinerary: Arc<ItineraryGenerator>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let history = Arc::new(ConversationHistory::with_max_turns(config.history.max_turns));
        let rag = Arc::new(RagService::from_config(config, history)?);
        let itinerary = Arc::new(ItineraryGenerator::new(
            Arc::clone(rag.llm()),
            config.llm.retry_policy(),
        ));
        Ok(Self { rag, itinerary })
    }

    fn history(&self) -> &ConversationHistory {
        self.rag.history()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/itinerary", post(handle_itinerary))
        .route("/itinerary/free", post(handle_free_form))
        .route("/details", post(handle_details))
        .route(
            "/sessions/{id}/history",
            get(handle_history).delete(handle_clear_history),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind `config.server.bind` and serve until the process is stopped.
///
/// The retrieval chain is initialized in the background so a missing or
/// slow index never blocks itinerary endpoints.
pub async fn run_server(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;

    let rag = Arc::clone(&state.rag);
    tokio::spawn(async move {
        if let Err(e) = rag.initialize().await {
            warn!("retrieval unavailable: {}", e.user_message());
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("travel guide listening on http://{}", config.server.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::AskRateLimited(_) | RagError::EmbeddingRateLimited(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            RagError::LlmProviderError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        warn!(code = err.code(), "request failed: {}", err);
        AppError {
            status,
            code: err.code().to_string(),
            message: err.user_message(),
        }
    }
}

impl From<ItineraryError> for AppError {
    fn from(err: ItineraryError) -> Self {
        let status = match &err {
            ItineraryError::MissingFields(_) | ItineraryError::Invalid(_) => StatusCode::BAD_REQUEST,
            ItineraryError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ItineraryError::Provider(_) => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    rag: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rag: state.rag.state().as_str().to_string(),
    })
}

// ============ POST /itinerary ============

#[derive(Serialize)]
struct ItineraryResponse {
    itinerary: String,
}

async fn handle_itinerary(
    State(state): State<AppState>,
    Json(request): Json<TripRequest>,
) -> Result<Json<ItineraryResponse>, AppError> {
    let itinerary = state.itinerary.generate_structured(&request).await?;
    Ok(Json(ItineraryResponse { itinerary }))
}

// ============ POST /itinerary/free ============

#[derive(Deserialize)]
struct FreeFormRequest {
    request: String,
}

async fn handle_free_form(
    State(state): State<AppState>,
    Json(body): Json<FreeFormRequest>,
) -> Result<Json<ItineraryResponse>, AppError> {
    let itinerary = state.itinerary.generate_free_form(&body.request).await?;
    Ok(Json(ItineraryResponse { itinerary }))
}

// ============ POST /details ============

#[derive(Deserialize)]
struct DetailsRequest {
    session_id: String,
    /// Used verbatim when present.
    #[serde(default)]
    query: Option<String>,
    /// The trip request to expand; wrapped in the default details question.
    #[serde(default)]
    request: Option<String>,
    #[serde(default = "default_record")]
    record: bool,
}

fn default_record() -> bool {
    true
}

#[derive(Serialize)]
struct DetailsResponse {
    session_id: String,
    query: String,
    answer: String,
}

async fn handle_details(
    State(state): State<AppState>,
    Json(body): Json<DetailsRequest>,
) -> Result<Json<DetailsResponse>, AppError> {
    if body.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }
    let query = match (body.query, body.request) {
        (Some(q), _) if !q.trim().is_empty() => q,
        (_, Some(r)) if !r.trim().is_empty() => details_query(&r),
        _ => return Err(bad_request("one of query or request must be non-empty")),
    };

    let chain = state.rag.initialize().await?;
    let answer = chain.ask(&body.session_id, &query).await?;
    if body.record {
        chain.record_turn(&body.session_id, &query, &answer);
    }

    Ok(Json(DetailsResponse {
        session_id: body.session_id,
        query,
        answer,
    }))
}

// ============ /sessions/{id}/history ============

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    turns: Vec<Turn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        turns: state.history().history(&id),
        session_id: id,
    })
}

#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    removed: usize,
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.history().clear(&id),
        session_id: id,
    })
}
