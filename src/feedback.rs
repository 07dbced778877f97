//! Background maintenance keeping the catalog, predictor, circuit breaker,
//! and cache coherent with reality.
//!
//! Each schedule runs on its own task and interval; none blocks request
//! serving. All tasks select on a shared shutdown channel and stop promptly
//! when it flips.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::catalog::ModelCatalog;
use crate::circuit::CircuitBreaker;
use crate::config::FeedbackConfig;
use crate::models::AvailabilityStatus;
use crate::predictor::Predictor;
use crate::util::now_unix;

/// Health below which a model is marked degraded during recomputation.
const DEGRADED_HEALTH: f64 = 0.4;

/// Handle over the spawned maintenance tasks.
pub struct FeedbackLoop {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl FeedbackLoop {
    /// Spawn all maintenance tasks.
    pub fn spawn(
        catalog: Arc<ModelCatalog>,
        predictor: Arc<Predictor>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<ResponseCache>,
        config: FeedbackConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();

        // Catalog discovery refresh.
        {
            let catalog = Arc::clone(&catalog);
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_interval(
                "catalog-refresh",
                config.catalog_refresh,
                rx,
                move || {
                    let catalog = Arc::clone(&catalog);
                    async move {
                        match catalog.refresh().await {
                            Ok(count) => debug!(count, "catalog refresh merged models"),
                            Err(e) => warn!(error = %e, "catalog refresh failed, keeping prior state"),
                        }
                    }
                },
            )));
        }

        // Pricing refresh for records past their next-update deadline.
        {
            let catalog = Arc::clone(&catalog);
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_interval(
                "pricing-refresh",
                config.pricing_refresh,
                rx,
                move || {
                    let catalog = Arc::clone(&catalog);
                    async move {
                        let updated = catalog.refresh_pricing().await;
                        if updated > 0 {
                            debug!(updated, "pricing records refreshed");
                        }
                    }
                },
            )));
        }

        // Health recomputation: fold predictor aggregates back into the
        // catalog's performance and availability fields.
        {
            let catalog = Arc::clone(&catalog);
            let predictor = Arc::clone(&predictor);
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_interval(
                "health-recompute",
                config.health_recompute,
                rx,
                move || {
                    let catalog = Arc::clone(&catalog);
                    let predictor = Arc::clone(&predictor);
                    async move {
                        recompute_health(&catalog, &predictor);
                    }
                },
            )));
        }

        // Circuit breaker idle-state cleanup.
        {
            let breaker = Arc::clone(&breaker);
            let idle_max = config.circuit_idle_max;
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_interval(
                "circuit-cleanup",
                config.circuit_cleanup,
                rx,
                move || {
                    let breaker = Arc::clone(&breaker);
                    async move {
                        let removed = breaker.cleanup_idle(idle_max);
                        if removed > 0 {
                            debug!(removed, "dropped idle circuit states");
                        }
                    }
                },
            )));
        }

        // Cache expiry sweep.
        {
            let cache = Arc::clone(&cache);
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_interval(
                "cache-sweep",
                config.cache_sweep,
                rx,
                move || {
                    let cache = Arc::clone(&cache);
                    async move {
                        let removed = cache.cleanup();
                        if removed > 0 {
                            debug!(removed, "swept expired cache entries");
                        }
                    }
                },
            )));
        }

        info!(tasks = handles.len(), "feedback loop started");
        Self { handles, shutdown }
    }

    /// Signal shutdown and wait for tasks to stop, up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("feedback tasks did not stop within the grace period");
        } else {
            info!("feedback loop stopped");
        }
    }
}

/// Run `work` every `period` until the shutdown channel flips.
async fn run_interval<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut work: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    // The immediate first tick would duplicate startup work.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                work().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(task = name, "feedback task stopping");
                    return;
                }
            }
        }
    }
}

/// Fold predictor aggregates into catalog performance/availability.
fn recompute_health(catalog: &ModelCatalog, predictor: &Predictor) {
    for model in catalog.list() {
        let samples = predictor.sample_count(&model.id);
        if samples == 0 {
            continue;
        }
        let prediction = predictor.predict(
            &model,
            crate::models::TaskType::General,
            crate::models::Complexity::Moderate,
        );
        let health = predictor.health(&model);
        catalog.update_runtime(&model.id, |m| {
            m.performance.avg_latency_ms = prediction.latency_ms;
            m.performance.success_rate = prediction.success_rate;
            m.performance.quality_score = prediction.quality;
            m.performance.updated_at = now_unix();
            m.availability.last_check = now_unix();
            // Only flip between online/degraded here; offline and
            // maintenance are owned by discovery.
            match m.availability.status {
                AvailabilityStatus::Online | AvailabilityStatus::Degraded => {
                    m.availability.status = if health.overall < DEGRADED_HEALTH {
                        AvailabilityStatus::Degraded
                    } else {
                        AvailabilityStatus::Online
                    };
                }
                _ => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::circuit::CircuitBreakerConfig;
    use crate::config::CacheConfig;
    use crate::models::{
        Capability, Complexity, Model, ModelAvailability, ModelPerformance, ModelPricing, Outcome,
        PricingSourceKind, RequestMetric, TaskType,
    };
    use std::collections::BTreeSet;

    fn model(id: &str) -> Model {
        Model {
            id: id.to_string(),
            display_name: id.to_string(),
            provider: "test".into(),
            capabilities: BTreeSet::from([Capability::TextGeneration]),
            pricing: ModelPricing {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
                currency: "USD".into(),
                source: PricingSourceKind::RateSheet,
                confidence: 0.9,
                refreshed_at: 0,
                next_update: u64::MAX,
            },
            performance: ModelPerformance::default(),
            availability: ModelAvailability::default(),
            enabled: true,
            fallback: None,
        }
    }

    fn metric(model_id: &str, latency: u64, quality: f64, outcome: Outcome) -> RequestMetric {
        RequestMetric {
            model_id: Some(model_id.to_string()),
            started_at: 0,
            ended_at: 0,
            latency_ms: latency,
            input_tokens: 10,
            output_tokens: 10,
            cost: 0.0,
            quality_signal: quality,
            outcome,
            task_type: TaskType::General,
            complexity: Complexity::Moderate,
        }
    }

    #[test]
    fn health_recompute_folds_predictor_aggregates() {
        let catalog = ModelCatalog::with_seeds(vec![model("m1")]);
        let predictor = Predictor::new();
        for _ in 0..10 {
            predictor.record(metric("m1", 400, 0.85, Outcome::Ok));
        }
        recompute_health(&catalog, &predictor);
        let m = catalog.get("m1").expect("entry");
        assert!((m.performance.avg_latency_ms - 400.0).abs() < 1e-9);
        assert!((m.performance.quality_score - 0.85).abs() < 1e-9);
        assert_eq!(m.availability.status, AvailabilityStatus::Online);
    }

    #[test]
    fn health_recompute_marks_failing_model_degraded() {
        let catalog = ModelCatalog::with_seeds(vec![model("m1")]);
        let predictor = Predictor::new();
        for _ in 0..10 {
            predictor.record(metric("m1", 5000, 0.0, Outcome::UpstreamError));
        }
        recompute_health(&catalog, &predictor);
        let m = catalog.get("m1").expect("entry");
        assert_eq!(m.availability.status, AvailabilityStatus::Degraded);
    }

    #[test]
    fn models_without_samples_are_untouched() {
        let catalog = ModelCatalog::with_seeds(vec![model("m1")]);
        let predictor = Predictor::new();
        recompute_health(&catalog, &predictor);
        let m = catalog.get("m1").expect("entry");
        assert!((m.performance.avg_latency_ms - 2000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shutdown_stops_tasks_within_grace() {
        let catalog = Arc::new(ModelCatalog::with_seeds(vec![model("m1")]));
        let predictor = Arc::new(Predictor::new());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let cache = Arc::new(ResponseCache::new(CacheConfig {
            max_bytes: 1 << 20,
            max_entries: 16,
            default_ttl: Duration::from_secs(60),
            semantic_threshold: 0.8,
            semantic_scan_cap: 64,
            policy: EvictionPolicy::Adaptive,
        }));
        let feedback = FeedbackLoop::spawn(
            catalog,
            predictor,
            breaker,
            cache,
            FeedbackConfig::default(),
        );
        // Must return promptly even though every interval is minutes long.
        tokio::time::timeout(Duration::from_secs(2), feedback.shutdown(Duration::from_secs(1)))
            .await
            .expect("shutdown finished in time");
    }
}
