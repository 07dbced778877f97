//! Per-request orchestration.
//!
//! One request flows through: cache lookup, guard inspection, classification,
//! policy selection, then the candidate chain under the circuit breaker, with
//! the response written back to the cache on success. Attempt metrics feed
//! the predictor; every request additionally records exactly one terminal
//! outcome in the stats counters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::catalog::ModelCatalog;
use crate::circuit::{BreakerError, CircuitBreaker};
use crate::classifier::Classifier;
use crate::error::RouteError;
use crate::guard::{Guard, RiskLevel};
use crate::models::{
    Classification, Model, Outcome, RequestMetric, ResponseMetadata, RouteRequest, RouteResponse,
    RouteStats,
};
use crate::policy::{Candidate, Policy};
use crate::predictor::Predictor;
use crate::upstream::{Upstream, UpstreamRequest};
use crate::util::now_unix;

/// How one candidate attempt failed.
#[derive(Debug, Clone)]
struct AttemptFailure {
    outcome: Outcome,
    message: String,
    retriable: bool,
}

#[derive(Default)]
struct StatsInner {
    total: u64,
    outcomes: HashMap<String, u64>,
    model_usage: HashMap<String, u64>,
    cache_hits: u64,
    semantic_hits: u64,
}

/// The routing pipeline and its collaborators.
pub struct RoutePipeline {
    catalog: Arc<ModelCatalog>,
    classifier: Arc<Classifier>,
    guard: Arc<Guard>,
    cache: Arc<ResponseCache>,
    breaker: Arc<CircuitBreaker>,
    predictor: Arc<Predictor>,
    policy: Arc<Policy>,
    /// Provider tag -> adapter.
    upstreams: HashMap<String, Arc<dyn Upstream>>,
    stats: RwLock<StatsInner>,
    request_deadline: Duration,
    upstream_timeout: Duration,
}

impl RoutePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<ModelCatalog>,
        classifier: Arc<Classifier>,
        guard: Arc<Guard>,
        cache: Arc<ResponseCache>,
        breaker: Arc<CircuitBreaker>,
        predictor: Arc<Predictor>,
        policy: Arc<Policy>,
        upstreams: HashMap<String, Arc<dyn Upstream>>,
        request_deadline: Duration,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            classifier,
            guard,
            cache,
            breaker,
            predictor,
            policy,
            upstreams,
            stats: RwLock::new(StatsInner::default()),
            request_deadline,
            upstream_timeout,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn predictor(&self) -> &Arc<Predictor> {
        &self.predictor
    }

    /// Readiness: the catalog has entries and at least one upstream adapter
    /// is configured.
    pub fn is_ready(&self) -> bool {
        !self.catalog.is_empty() && !self.upstreams.is_empty()
    }

    /// Route one request to completion.
    pub async fn route(&self, req: RouteRequest) -> Result<RouteResponse, RouteError> {
        let started = Instant::now();
        let deadline = started + self.request_deadline;

        if let Some(retry_after_secs) = self.guard.check_rate(&req.caller) {
            self.record_terminal("rate-limited", None);
            return Err(RouteError::RateLimited { retry_after_secs });
        }

        // Step 1: cache lookup. The fingerprint comes from the rule tier,
        // which is deterministic and does not need the semantic tier.
        let prelim = self.classifier.classify_rules(&req, &req.content);
        let cache_key = ResponseCache::fingerprint(
            prelim.task_type,
            prelim.complexity,
            &req.content,
        );
        if let Some(hit) = self.cache.get(&cache_key) {
            debug!(request_id = %req.id, key = %cache_key, "exact cache hit");
            return Ok(self.finish_cached(req, hit, started, false));
        }
        if let Some((hit, similarity)) = self.cache.get_semantic(&req.content) {
            debug!(request_id = %req.id, similarity, "semantic cache hit");
            return Ok(self.finish_cached(req, hit, started, true));
        }

        // Step 2: guard. A blocked verdict never reaches an upstream.
        let verdict = self.guard.inspect_request(&req.content);
        if verdict.blocked {
            let reason = verdict.first_anomaly();
            warn!(request_id = %req.id, risk = %verdict.risk_level, reason = %reason, "request blocked");
            self.record_attempt(self.base_metric(None, &prelim, Outcome::SafetyBlock, 0));
            self.record_terminal("safety-block", None);
            return Err(RouteError::SafetyBlock(reason));
        }

        // Step 3: classification over the sanitized payload.
        let classification = self
            .classifier
            .classify(&req, &verdict.sanitized_content)
            .await;
        debug!(
            request_id = %req.id,
            domain = %classification.domain,
            task = %classification.task_type,
            complexity = %classification.complexity,
            confidence = classification.confidence,
            "request classified"
        );

        // Step 4: candidate selection.
        let models = self.catalog.list();
        let candidates =
            self.policy
                .select(&classification, &models, &self.predictor, &self.breaker);
        if candidates.is_empty() {
            self.record_attempt(self.base_metric(None, &classification, Outcome::RoutingFailure, 0));
            self.record_terminal("routing-failure", None);
            return Err(RouteError::RoutingFailure);
        }

        // Step 5: walk the fallback chain.
        let upstream_req = UpstreamRequest {
            content: verdict.sanitized_content.clone(),
            max_tokens: req.hints.max_tokens,
            temperature: req.hints.temperature,
        };

        let mut last_failure: Option<AttemptFailure> = None;
        let mut attempts = 0usize;
        let mut circuit_rejections = 0usize;
        let mut other_failures = 0usize;

        for candidate in &candidates {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;

            // Skip a candidate that cannot finish inside the budget.
            if candidate.prediction.latency_ms > remaining.as_millis() as f64 {
                debug!(
                    model = %candidate.model.id,
                    predicted_ms = candidate.prediction.latency_ms,
                    remaining_ms = remaining.as_millis() as u64,
                    "skipping candidate, predicted latency exceeds remaining budget"
                );
                continue;
            }

            let Some(upstream) = self.upstreams.get(&candidate.model.provider) else {
                warn!(
                    model = %candidate.model.id,
                    provider = %candidate.model.provider,
                    "no adapter for provider"
                );
                other_failures += 1;
                last_failure = Some(AttemptFailure {
                    outcome: Outcome::UpstreamError,
                    message: format!("no adapter for provider {}", candidate.model.provider),
                    retriable: true,
                });
                continue;
            };

            attempts += 1;
            let per_call = self.upstream_timeout.min(remaining);
            let attempt_started = Instant::now();

            let result = self
                .breaker
                .execute_or(
                    &candidate.model.id,
                    || self.attempt(upstream.as_ref(), &upstream_req, &candidate.model, per_call, true),
                    || self.attempt(upstream.as_ref(), &upstream_req, &candidate.model, per_call, false),
                )
                .await;

            match result {
                Ok(upstream_resp) => {
                    let response = self.finish_success(
                        &req,
                        &classification,
                        candidate,
                        upstream_resp,
                        &cache_key,
                        started,
                        attempts > 1,
                    );
                    return Ok(response);
                }
                Err(BreakerError::Open) => {
                    circuit_rejections += 1;
                    self.record_attempt(self.attempt_metric(
                        candidate,
                        &classification,
                        Outcome::CircuitOpen,
                        attempt_started,
                    ));
                    debug!(model = %candidate.model.id, "circuit open, trying next candidate");
                    last_failure = Some(AttemptFailure {
                        outcome: Outcome::CircuitOpen,
                        message: format!("circuit open for {}", candidate.model.id),
                        retriable: true,
                    });
                }
                Err(BreakerError::Inner(failure)) => {
                    self.record_attempt(self.attempt_metric(
                        candidate,
                        &classification,
                        failure.outcome,
                        attempt_started,
                    ));

                    // A per-call timeout that consumed the whole budget is the
                    // request deadline: stop without touching the next candidate.
                    if failure.outcome == Outcome::Timeout && Instant::now() >= deadline {
                        self.record_terminal("timeout", Some(&candidate.model.id));
                        return Err(RouteError::Timeout);
                    }

                    if !failure.retriable {
                        info!(
                            model = %candidate.model.id,
                            error = %failure.message,
                            "non-retriable upstream error, not attempting fallback"
                        );
                        self.record_terminal("upstream-error", Some(&candidate.model.id));
                        return Err(RouteError::Upstream {
                            message: failure.message,
                            fallback_exhausted: true,
                        });
                    }

                    warn!(
                        model = %candidate.model.id,
                        outcome = %failure.outcome,
                        error = %failure.message,
                        "candidate failed, trying next"
                    );
                    other_failures += 1;
                    last_failure = Some(failure);
                }
            }
        }

        // Step 6: candidates exhausted.
        match last_failure {
            None => {
                // Nothing was attempted: the remaining budget could not fit
                // any candidate.
                self.record_attempt(self.base_metric(None, &classification, Outcome::Timeout, 0));
                self.record_terminal("timeout", None);
                Err(RouteError::Timeout)
            }
            Some(_) if circuit_rejections > 0 && other_failures == 0 => {
                self.record_terminal("circuit-open", None);
                Err(RouteError::CircuitOpen)
            }
            Some(failure) => {
                self.record_terminal("upstream-error", None);
                Err(RouteError::Upstream {
                    message: format!("all candidates failed; last: {}", failure.message),
                    fallback_exhausted: true,
                })
            }
        }
    }

    /// One upstream attempt: per-call timeout plus, on the guarded path,
    /// response inspection. The unguarded variant serves as the breaker's
    /// open-circuit fallback.
    async fn attempt(
        &self,
        upstream: &dyn Upstream,
        req: &UpstreamRequest,
        model: &Model,
        per_call: Duration,
        inspect_response: bool,
    ) -> Result<crate::upstream::UpstreamResponse, AttemptFailure> {
        let outcome = tokio::time::timeout(per_call, upstream.generate(req, model)).await;
        match outcome {
            Err(_elapsed) => Err(AttemptFailure {
                outcome: Outcome::Timeout,
                message: format!("call to {} exceeded {}ms", model.id, per_call.as_millis()),
                retriable: true,
            }),
            Ok(Err(e)) => Err(AttemptFailure {
                outcome: Outcome::UpstreamError,
                retriable: e.is_retriable(),
                message: e.to_string(),
            }),
            Ok(Ok(resp)) => {
                if inspect_response {
                    let verdict = self.guard.inspect_response(&resp.content);
                    if verdict.risk_level == RiskLevel::Critical {
                        return Err(AttemptFailure {
                            outcome: Outcome::SafetyBlock,
                            message: verdict.first_anomaly(),
                            retriable: true,
                        });
                    }
                }
                Ok(resp)
            }
        }
    }

    fn finish_success(
        &self,
        req: &RouteRequest,
        classification: &Classification,
        candidate: &Candidate,
        upstream_resp: crate::upstream::UpstreamResponse,
        cache_key: &str,
        started: Instant,
        after_failures: bool,
    ) -> RouteResponse {
        let model = &candidate.model;
        let cost = model
            .pricing
            .cost(upstream_resp.tokens.input, upstream_resp.tokens.output);
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let response = RouteResponse {
            id: uuid::Uuid::new_v4().to_string(),
            content: upstream_resp.content,
            model: model.id.clone(),
            tokens: upstream_resp.tokens,
            cost,
            latency_ms: upstream_resp.latency_ms,
            quality: candidate.prediction.quality,
            timestamp: now_unix(),
            metadata: ResponseMetadata {
                request_id: req.id.clone(),
                processing_time_ms,
                use_case: req.hints.use_case.clone(),
                complexity: classification.complexity,
                cache_hit: None,
                semantic_hit: None,
                fallback_exhausted: Some(false),
            },
        };

        if after_failures {
            info!(request_id = %req.id, model = %model.id, "served by fallback candidate");
        }

        let metric = RequestMetric {
            model_id: Some(model.id.clone()),
            started_at: now_unix().saturating_sub(processing_time_ms / 1000),
            ended_at: now_unix(),
            latency_ms: upstream_resp.latency_ms,
            input_tokens: response.tokens.input,
            output_tokens: response.tokens.output,
            cost,
            quality_signal: candidate.prediction.quality,
            outcome: Outcome::Ok,
            task_type: classification.task_type,
            complexity: classification.complexity,
        };
        self.record_attempt(metric);
        self.record_terminal("ok", Some(&model.id));

        let ttl = self
            .cache
            .ttl_for(classification.complexity, classification.priority);
        self.cache.set(
            cache_key.to_string(),
            response.clone(),
            req.content.clone(),
            ttl,
            classification.priority,
            vec![
                format!("model:{}", model.id),
                format!("task:{}", classification.task_type),
            ],
        );

        response
    }

    fn finish_cached(
        &self,
        req: RouteRequest,
        mut hit: RouteResponse,
        started: Instant,
        semantic: bool,
    ) -> RouteResponse {
        hit.metadata.request_id = req.id;
        hit.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        hit.metadata.cache_hit = Some(true);
        hit.metadata.semantic_hit = semantic.then_some(true);
        hit.metadata.fallback_exhausted = None;

        {
            let mut stats = self.stats.write().expect("stats lock poisoned");
            stats.total += 1;
            *stats.outcomes.entry("ok".to_string()).or_insert(0) += 1;
            stats.cache_hits += 1;
            if semantic {
                stats.semantic_hits += 1;
            }
            *stats.model_usage.entry(hit.model.clone()).or_insert(0) += 1;
        }
        hit
    }

    fn base_metric(
        &self,
        model_id: Option<&str>,
        classification: &Classification,
        outcome: Outcome,
        latency_ms: u64,
    ) -> RequestMetric {
        RequestMetric {
            model_id: model_id.map(|s| s.to_string()),
            started_at: now_unix(),
            ended_at: now_unix(),
            latency_ms,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            quality_signal: 0.0,
            outcome,
            task_type: classification.task_type,
            complexity: classification.complexity,
        }
    }

    fn attempt_metric(
        &self,
        candidate: &Candidate,
        classification: &Classification,
        outcome: Outcome,
        attempt_started: Instant,
    ) -> RequestMetric {
        self.base_metric(
            Some(&candidate.model.id),
            classification,
            outcome,
            attempt_started.elapsed().as_millis() as u64,
        )
    }

    fn record_attempt(&self, metric: RequestMetric) {
        self.predictor.record(metric);
    }

    fn record_terminal(&self, kind: &str, model_id: Option<&str>) {
        let mut stats = self.stats.write().expect("stats lock poisoned");
        stats.total += 1;
        *stats.outcomes.entry(kind.to_string()).or_insert(0) += 1;
        if kind == "ok" {
            if let Some(id) = model_id {
                *stats.model_usage.entry(id.to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Aggregated counters for the stats endpoint.
    pub fn stats(&self) -> RouteStats {
        let stats = self.stats.read().expect("stats lock poisoned");
        let circuits = self
            .breaker
            .summary()
            .into_iter()
            .map(|(k, v)| (k, v.status.as_str().to_string()))
            .collect();
        RouteStats {
            total_requests: stats.total,
            outcomes: stats.outcomes.clone(),
            model_usage: stats.model_usage.clone(),
            cache_hits: stats.cache_hits,
            semantic_hits: stats.semantic_hits,
            cache_hit_rate: if stats.total > 0 {
                stats.cache_hits as f64 / stats.total as f64
            } else {
                0.0
            },
            circuits,
        }
    }
}
