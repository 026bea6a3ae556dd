use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use uuid::Uuid;

use copydesk_core::suggest::{SuggestError, SuggestionPipeline};
use copydesk_core::types::{SuggestionRequest, SuggestionResponse};

pub type AppState = Arc<SuggestionPipeline>;

/// Callers include browser plugin iframes with a `null` origin, so any
/// origin is allowed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get-suggestions", post(get_suggestions))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

/// A failed request rendered as an HTTP response. Every failure carries a
/// JSON [`ErrorBody`].
#[derive(Debug)]
pub enum ApiError {
    Suggest(SuggestError),
    /// The body was not a JSON object of the expected shape.
    Body(JsonRejection),
}

impl From<SuggestError> for ApiError {
    fn from(e: SuggestError) -> Self {
        Self::Suggest(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Body(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Body(_) | Self::Suggest(SuggestError::Invalid) => StatusCode::BAD_REQUEST,
            Self::Suggest(
                SuggestError::EmbeddingUnavailable(_)
                | SuggestError::CorpusUnavailable(_)
                | SuggestError::GenerationUnavailable(_),
            ) => StatusCode::BAD_GATEWAY,
            Self::Suggest(SuggestError::CorpusCorrupted(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing body. Upstream details stay in the logs.
    pub fn body(&self) -> ErrorBody {
        let e = match self {
            Self::Body(rejection) => {
                return ErrorBody { error: rejection.body_text(), kind: "invalid_request" };
            }
            Self::Suggest(e) => e,
        };
        let error = match e {
            SuggestError::Invalid => e.to_string(),
            SuggestError::EmbeddingUnavailable(_) => "could not compute embedding".into(),
            SuggestError::CorpusUnavailable(_) => "could not read corpus".into(),
            SuggestError::CorpusCorrupted(_) => "corpus corrupted".into(),
            SuggestError::GenerationUnavailable(_) => "could not generate suggestions".into(),
        };
        ErrorBody { error, kind: e.kind() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

pub async fn get_suggestions(
    State(pipeline): State<AppState>,
    payload: Result<Json<SuggestionRequest>, JsonRejection>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("get_suggestions", %request_id);
    suggest(&pipeline, payload).instrument(span).await
}

async fn suggest(
    pipeline: &SuggestionPipeline,
    payload: Result<Json<SuggestionRequest>, JsonRejection>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let Json(req) = payload.inspect_err(|e| tracing::debug!(error = %e, "rejected body"))?;
    match pipeline.run(&req).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            if matches!(e, SuggestError::Invalid) {
                tracing::debug!(error = %e, "rejected request");
            } else {
                tracing::error!(error = %e, kind = e.kind(), "suggestion request failed");
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub retriever: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_loaded_at: Option<DateTime<Utc>>,
}

pub async fn health(State(pipeline): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        retriever: pipeline.retriever_name().to_owned(),
        corpus_loaded_at: pipeline.corpus_loaded_at(),
    })
}
