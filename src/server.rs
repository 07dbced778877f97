use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::RouteError;
use crate::models::{Attachment, Complexity, Priority, RequestHints, RouteRequest};
use crate::pipeline::RoutePipeline;
use crate::util::cors_layer_from_env;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RoutePipeline>,
}

/// Build the ingress router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/route", post(route))
        .route("/v1/route/stats", get(stats))
        .route("/v1/route/models", get(models))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer_from_env())
        .with_state(state)
}

/// Wire body for `POST /v1/route`.
#[derive(Debug, Deserialize)]
pub struct RouteBody {
    pub content: Option<String>,
    #[serde(rename = "useCase")]
    pub use_case: Option<String>,
    pub complexity: Option<String>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Numeric priority hint, 1 (low) through 4 (critical).
    pub priority: Option<u8>,
    /// Maximum spend in USD.
    pub budget: Option<f64>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

/// Correlation id from the caller, or a fresh one.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Caller identity as established by the outer auth layer, when present.
fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get("x-caller-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// `POST /v1/route`: classify, select, execute.
async fn route(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RouteBody>>,
) -> Response {
    let correlation = correlation_id(&headers);

    let Some(Json(body)) = body else {
        return RouteError::InvalidInput("request body is not valid JSON".into())
            .into_response_with_id(&correlation);
    };
    let content = match body.content.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => {
            return RouteError::InvalidInput("'content' is required".into())
                .into_response_with_id(&correlation);
        }
    };

    let hints = RequestHints {
        use_case: body.use_case.clone(),
        complexity: body.complexity.as_deref().and_then(Complexity::parse),
        priority: body.priority.map(Priority::from_hint),
        budget: body.budget,
        max_tokens: body.max_tokens,
        temperature: body.temperature,
    };

    let request = RouteRequest::new(correlation.clone(), caller_id(&headers), content)
        .with_hints(hints)
        .with_attachments(body.attachments.unwrap_or_default());

    tracing::info!(
        correlation_id = %correlation,
        caller = %request.caller,
        content_len = request.content.len(),
        attachments = request.attachments.len(),
        "routing request accepted"
    );

    match state.pipeline.route(request).await {
        Ok(response) => {
            tracing::info!(
                correlation_id = %correlation,
                model = %response.model,
                latency_ms = response.latency_ms,
                cache_hit = response.metadata.cache_hit.unwrap_or(false),
                "request served"
            );
            (http::StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::warn!(
                correlation_id = %correlation,
                kind = e.kind(),
                error = %e,
                "request failed"
            );
            e.into_response_with_id(&correlation)
        }
    }
}

/// `GET /v1/route/stats`: aggregated outcome and usage counters.
async fn stats(State(state): State<AppState>) -> Response {
    Json(state.pipeline.stats()).into_response()
}

/// `GET /v1/route/models`: projection of the catalog.
async fn models(State(state): State<AppState>) -> Response {
    let models = state.pipeline.catalog().list();
    Json(serde_json::json!({
        "models": models,
        "count": models.len(),
    }))
    .into_response()
}

/// Liveness.
async fn healthz() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// Readiness: catalog non-empty and at least one upstream configured.
async fn readyz(State(state): State<AppState>) -> Response {
    if state.pipeline.is_ready() {
        Json(serde_json::json!({ "status": "ready" })).into_response()
    } else {
        (
            http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not-ready",
                "reason": "catalog empty or no upstream configured",
            })),
        )
            .into_response()
    }
}
