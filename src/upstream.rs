//! Upstream provider abstraction.
//!
//! Every provider is reached through one adapter contract: `Upstream`.
//! Errors carry a kind so the pipeline can distinguish retriable conditions
//! (try the next candidate) from terminal ones (surface to the caller).

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::{Model, TokenUsage};

/// Provider error classification, aligned with common RPC status families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamErrorKind {
    InvalidArgument,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Internal,
}

/// An error from a provider adapter.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Retriable errors move the pipeline to the next candidate; the rest
    /// terminate the fallback chain.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            UpstreamErrorKind::ResourceExhausted
                | UpstreamErrorKind::Unavailable
                | UpstreamErrorKind::DeadlineExceeded
        )
    }
}

/// The generation request handed to an adapter.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub content: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub content: String,
    pub tokens: TokenUsage,
    pub latency_ms: u64,
    /// Provider payload for diagnostics, when the adapter keeps it.
    pub raw: Option<serde_json::Value>,
}

/// Single adapter contract for all providers.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Provider tag this adapter serves ("openai", "anthropic", "vertex").
    fn provider(&self) -> &str;

    async fn generate(
        &self,
        req: &UpstreamRequest,
        model: &Model,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

/// Adapter for OpenAI-compatible chat-completion endpoints.
///
/// Credentials are env handles, never inline secrets: `key_env` names the
/// variable holding the bearer token.
pub struct HttpUpstream {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    key_env: String,
    call_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(
        client: reqwest::Client,
        provider: impl Into<String>,
        base_url: impl Into<String>,
        key_env: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            provider: provider.into(),
            base_url: base_url.into(),
            key_env: key_env.into(),
            call_timeout,
        }
    }

    fn bearer(&self) -> Option<String> {
        std::env::var(&self.key_env)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

fn kind_from_status(status: reqwest::StatusCode) -> UpstreamErrorKind {
    match status.as_u16() {
        400 | 404 | 422 => UpstreamErrorKind::InvalidArgument,
        401 | 403 => UpstreamErrorKind::PermissionDenied,
        429 => UpstreamErrorKind::ResourceExhausted,
        500 | 502 | 503 => UpstreamErrorKind::Unavailable,
        504 => UpstreamErrorKind::DeadlineExceeded,
        _ => UpstreamErrorKind::Internal,
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(
        &self,
        req: &UpstreamRequest,
        model: &Model,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": model.id,
            "messages": [{ "role": "user", "content": req.content }],
        });
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let mut rb = self
            .client
            .post(&url)
            .timeout(self.call_timeout)
            .header(http::header::CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(key) = self.bearer() {
            rb = rb.bearer_auth(key);
        }

        let started = Instant::now();
        let resp = rb.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                UpstreamErrorKind::DeadlineExceeded
            } else if e.is_connect() {
                UpstreamErrorKind::Unavailable
            } else {
                UpstreamErrorKind::Internal
            };
            UpstreamError::new(kind, e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::new(
                kind_from_status(status),
                format!("{status}: {text}"),
            ));
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::new(UpstreamErrorKind::Internal, e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(UpstreamError::new(
                UpstreamErrorKind::Internal,
                "upstream returned no content",
            ));
        }
        let input = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let output = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        Ok(UpstreamResponse {
            content,
            tokens: TokenUsage::new(input, output),
            latency_ms,
            raw: Some(payload),
        })
    }
}

/// Build provider adapters from the `MODELGATE_UPSTREAMS` environment rule
/// list.
///
/// Format: semicolon-separated rules of comma-separated `key=value` pairs:
///
/// ```text
/// MODELGATE_UPSTREAMS="provider=openai,base=https://api.openai.com/v1,key_env=OPENAI_API_KEY;\
/// provider=anthropic,base=https://api.anthropic.com/v1,key_env=ANTHROPIC_API_KEY"
/// ```
///
/// Unknown keys are ignored; rules missing `provider` or `base` are skipped.
pub fn upstreams_from_env(
    client: &reqwest::Client,
    call_timeout: Duration,
) -> std::collections::HashMap<String, std::sync::Arc<dyn Upstream>> {
    let mut out: std::collections::HashMap<String, std::sync::Arc<dyn Upstream>> =
        std::collections::HashMap::new();
    let Ok(cfg) = std::env::var("MODELGATE_UPSTREAMS") else {
        return out;
    };

    for rule_raw in cfg.split(';') {
        let rule = rule_raw.trim();
        if rule.is_empty() {
            continue;
        }
        let mut provider: Option<String> = None;
        let mut base: Option<String> = None;
        let mut key_env: Option<String> = None;

        for kv in rule.split(',') {
            let p = kv.trim();
            if p.is_empty() || !p.contains('=') {
                continue;
            }
            let mut it = p.splitn(2, '=');
            let k = it.next().unwrap_or("").trim().to_ascii_lowercase();
            let v = it.next().unwrap_or("").trim().to_string();
            if v.is_empty() {
                continue;
            }
            match k.as_str() {
                "provider" | "name" => provider = Some(v),
                "base" | "base_url" => base = Some(v),
                "key_env" | "api_key_env" => key_env = Some(v),
                _ => {}
            }
        }

        if let (Some(provider), Some(base)) = (provider, base) {
            let key_env = key_env.unwrap_or_else(|| {
                format!("{}_API_KEY", provider.to_ascii_uppercase())
            });
            out.insert(
                provider.clone(),
                std::sync::Arc::new(HttpUpstream::new(
                    client.clone(),
                    provider,
                    base,
                    key_env,
                    call_timeout,
                )),
            );
        }
    }
    out
}

/// One scripted reply for the mock adapter.
pub type ScriptedReply = Result<UpstreamResponse, UpstreamError>;

/// Scriptable in-process upstream for tests and local development.
///
/// Replies are consumed in order; when the script runs dry the mock repeats
/// its default behavior (success unless constructed failing).
pub struct MockUpstream {
    provider: String,
    script: Mutex<Vec<ScriptedReply>>,
    default_reply: ScriptedReply,
    delay: Duration,
    calls: AtomicU64,
}

impl MockUpstream {
    pub fn ok(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            script: Mutex::new(Vec::new()),
            default_reply: Ok(Self::canned_response("mock response")),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    pub fn failing(provider: impl Into<String>, kind: UpstreamErrorKind) -> Self {
        Self {
            provider: provider.into(),
            script: Mutex::new(Vec::new()),
            default_reply: Err(UpstreamError::new(kind, "mock failure")),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// Simulated per-call latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue replies consumed before the default behavior.
    pub fn with_script(self, replies: Vec<ScriptedReply>) -> Self {
        {
            let mut script = self.script.lock().expect("mock lock poisoned");
            *script = replies;
        }
        self
    }

    pub fn canned_response(content: &str) -> UpstreamResponse {
        UpstreamResponse {
            content: content.to_string(),
            tokens: TokenUsage::new(42, 17),
            latency_ms: 1,
            raw: None,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(
        &self,
        _req: &UpstreamRequest,
        _model: &Model,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = {
            let mut script = self.script.lock().expect("mock lock poisoned");
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        scripted.unwrap_or_else(|| self.default_reply.clone())
    }
}
