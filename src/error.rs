//! Error taxonomy for the routing core.
//!
//! Every failure maps to exactly one kind; the kind string is what callers
//! see in the response body and what the stats counters key on.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// A routing failure surfaced to the caller.
#[derive(Error, Debug)]
pub enum RouteError {
    /// Schema violation or missing `content`.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Guard rejected the request or the response.
    #[error("request blocked: {0}")]
    SafetyBlock(String),

    /// Ingress or guard rate limiter rejected the caller.
    #[error("rate limited")]
    RateLimited {
        /// Seconds until the caller should retry.
        retry_after_secs: u64,
    },

    /// No candidate satisfies the routing constraints, even after relaxation.
    #[error("no candidate model satisfies the routing constraints")]
    RoutingFailure,

    /// Every candidate's circuit is open.
    #[error("all candidate circuits are open")]
    CircuitOpen,

    /// A provider error propagated after the fallback chain was exhausted.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        /// True when every candidate was attempted before giving up.
        fallback_exhausted: bool,
    },

    /// Request deadline or per-call timeout elapsed.
    #[error("deadline exceeded")]
    Timeout,

    /// A bug or invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouteError {
    /// Stable kind string used in response bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::InvalidInput(_) => "invalid-input",
            RouteError::SafetyBlock(_) => "safety-block",
            RouteError::RateLimited { .. } => "rate-limited",
            RouteError::RoutingFailure => "routing-failure",
            RouteError::CircuitOpen => "circuit-open",
            RouteError::Upstream { .. } => "upstream-error",
            RouteError::Timeout => "timeout",
            RouteError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RouteError::SafetyBlock(_) => StatusCode::FORBIDDEN,
            RouteError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RouteError::RoutingFailure | RouteError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RouteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the user-visible error body: `{error, message, requestId, details?}`.
    pub fn to_body(&self, request_id: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
            "requestId": request_id,
        });
        if let RouteError::Upstream {
            fallback_exhausted, ..
        } = self
        {
            body["details"] = serde_json::json!({ "fallbackExhausted": fallback_exhausted });
        }
        if let RouteError::RateLimited { retry_after_secs } = self {
            body["details"] = serde_json::json!({ "retryAfterSecs": retry_after_secs });
        }
        body
    }

    /// Convert to an HTTP response without request context.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let status = self.status();
        let mut response = (status, axum::Json(self.to_body(request_id))).into_response();
        if let RouteError::RateLimited { retry_after_secs } = self {
            if let Ok(v) = http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(http::header::RETRY_AFTER, v);
            }
        }
        response
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        self.into_response_with_id("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_statuses() {
        assert_eq!(RouteError::InvalidInput("x".into()).kind(), "invalid-input");
        assert_eq!(RouteError::InvalidInput("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(RouteError::SafetyBlock("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(RouteError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(RouteError::RoutingFailure.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            RouteError::RateLimited { retry_after_secs: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn upstream_body_carries_exhaustion_flag() {
        let e = RouteError::Upstream {
            message: "boom".into(),
            fallback_exhausted: true,
        };
        let body = e.to_body("req-1");
        assert_eq!(body["error"], "upstream-error");
        assert_eq!(body["requestId"], "req-1");
        assert_eq!(body["details"]["fallbackExhausted"], true);
    }
}
