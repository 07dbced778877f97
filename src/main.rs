use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use modelgate::cache::ResponseCache;
use modelgate::catalog::ModelCatalog;
use modelgate::circuit::CircuitBreaker;
use modelgate::classifier::{Classifier, HttpSemanticClassifier};
use modelgate::config::RouterConfig;
use modelgate::feedback::FeedbackLoop;
use modelgate::guard::{Guard, GuardConfig};
use modelgate::pipeline::RoutePipeline;
use modelgate::policy::Policy;
use modelgate::predictor::Predictor;
use modelgate::server::{router, AppState};
use modelgate::upstream::{upstreams_from_env, Upstream};
use modelgate::util::{build_http_client_from_env, env_bind_addr, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match RouterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return Err(e);
        }
    };

    let http = build_http_client_from_env();

    // Catalog seeded from the routing table; discovery and pricing refresh
    // keep it current from here on.
    let seeds: Vec<_> = config
        .routing_table
        .models
        .iter()
        .cloned()
        .map(|seed| seed.into_model())
        .collect();
    tracing::info!(
        models = seeds.len(),
        tasks = config.routing_table.tasks.len(),
        "routing table loaded"
    );
    let catalog = Arc::new(ModelCatalog::with_seeds(seeds));

    // Optional semantic classification tier.
    let classifier = match &config.semantic_classifier_url {
        Some(url) => {
            tracing::info!("semantic classifier tier enabled: {url}");
            Arc::new(
                Classifier::new()
                    .with_semantic(Arc::new(HttpSemanticClassifier::new(http.clone(), url)), 0.8),
            )
        }
        None => {
            tracing::info!("semantic classifier tier disabled, rule tier only");
            Arc::new(Classifier::new())
        }
    };

    let guard = Arc::new(Guard::new(GuardConfig {
        max_prompt_len: config.max_prompt_len,
        ..GuardConfig::default()
    }));
    let cache = Arc::new(ResponseCache::new(config.cache.clone()));
    let breaker = Arc::new(CircuitBreaker::new(config.circuit.clone()));
    let predictor = Arc::new(Predictor::new());
    let policy = Arc::new(Policy::new(config.routing_table.clone()));

    let upstreams: HashMap<String, Arc<dyn Upstream>> =
        upstreams_from_env(&http, config.upstream_timeout);
    if upstreams.is_empty() {
        tracing::warn!(
            "no upstream adapters configured (set MODELGATE_UPSTREAMS); requests will fail routing"
        );
    } else {
        let providers: Vec<&str> = upstreams.keys().map(String::as_str).collect();
        tracing::info!(providers = ?providers, "upstream adapters configured");
    }

    let pipeline = Arc::new(RoutePipeline::new(
        Arc::clone(&catalog),
        classifier,
        guard,
        Arc::clone(&cache),
        Arc::clone(&breaker),
        Arc::clone(&predictor),
        policy,
        upstreams,
        config.request_deadline,
        config.upstream_timeout,
    ));

    let feedback = FeedbackLoop::spawn(
        catalog,
        predictor,
        breaker,
        cache,
        config.feedback.clone(),
    );

    let app = router(AppState {
        pipeline: Arc::clone(&pipeline),
    });

    let addr = env_bind_addr();
    tracing::info!("Modelgate listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain background tasks before exit.
    feedback.shutdown(Duration::from_secs(10)).await;
    tracing::info!("Modelgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {e}");
    } else {
        tracing::info!("shutdown signal received, draining");
    }
}
