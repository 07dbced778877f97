//! Model catalog: the set of models that may currently be chosen.
//!
//! Discovery and pricing are pluggable collaborators injected at
//! construction. A refresh merges each source's provisional entries by id,
//! preferring the highest-precedence recent pricing record; a failed refresh
//! leaves prior state intact and never empties the catalog.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{Model, ModelPricing, PricingSourceKind};
use crate::util::now_unix;

/// Pluggable model discovery source.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Human-readable source name, used in refresh logs.
    fn name(&self) -> &str;

    /// Enumerate currently available models as provisional entries.
    async fn discover(&self) -> anyhow::Result<Vec<Model>>;
}

/// Pluggable pricing resolver for catalog entries.
#[async_trait]
pub trait PricingSource: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve pricing for one model; `None` when the source has no record.
    async fn price(&self, model: &Model) -> anyhow::Result<Option<ModelPricing>>;
}

/// Static discovery over a fixed seed list (the routing-table models).
pub struct StaticDiscovery {
    models: Vec<Model>,
}

impl StaticDiscovery {
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover(&self) -> anyhow::Result<Vec<Model>> {
        Ok(self.models.clone())
    }
}

/// Name-based heuristic pricing, the lowest-precedence source above the
/// static default. Mirrors the common provider tiers: flagship, mid, mini.
pub struct HeuristicPricing;

#[async_trait]
impl PricingSource for HeuristicPricing {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn price(&self, model: &Model) -> anyhow::Result<Option<ModelPricing>> {
        let id = model.id.to_ascii_lowercase();
        let (input, output) = if id.contains("nano") || id.contains("lite") {
            (0.0001, 0.0004)
        } else if id.contains("mini") || id.contains("flash") || id.contains("haiku") {
            (0.0005, 0.002)
        } else if id.contains("opus") || id.contains("ultra") {
            (0.015, 0.075)
        } else {
            (0.003, 0.015)
        };
        let now = now_unix();
        Ok(Some(ModelPricing {
            input_per_1k: input,
            output_per_1k: output,
            currency: "USD".into(),
            source: PricingSourceKind::Heuristic,
            confidence: 0.4,
            refreshed_at: now,
            next_update: now + 24 * 3600,
        }))
    }
}

struct CatalogEntry {
    model: Model,
    /// Unix seconds when discovery last reported the model.
    last_seen: u64,
}

/// Thread-safe model catalog with snapshot reads.
pub struct ModelCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
    discovery: Vec<Box<dyn Discovery>>,
    pricing: Vec<Box<dyn PricingSource>>,
    /// Entries unseen for longer than this are dropped during refresh.
    staleness: Duration,
}

impl ModelCatalog {
    pub fn new(
        discovery: Vec<Box<dyn Discovery>>,
        pricing: Vec<Box<dyn PricingSource>>,
        staleness: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            discovery,
            pricing,
            staleness,
        }
    }

    /// Catalog seeded with a fixed model list and heuristic pricing.
    pub fn with_seeds(models: Vec<Model>) -> Self {
        let catalog = Self::new(
            vec![Box::new(StaticDiscovery::new(models.clone()))],
            vec![Box::new(HeuristicPricing)],
            Duration::from_secs(24 * 3600),
        );
        for model in models {
            catalog.upsert(model);
        }
        catalog
    }

    /// Snapshot of all entries.
    pub fn list(&self) -> Vec<Model> {
        let entries = self.entries.read().expect("catalog lock poisoned");
        entries.values().map(|e| e.model.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Model> {
        let entries = self.entries.read().expect("catalog lock poisoned");
        entries.get(id).map(|e| e.model.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idempotent insert/update. Keeps observed performance when the
    /// incoming entry carries none, and keeps the higher-precedence pricing
    /// record.
    pub fn upsert(&self, incoming: Model) {
        let now = now_unix();
        let mut entries = self.entries.write().expect("catalog lock poisoned");
        match entries.entry(incoming.id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.last_seen = now;
                let keep_pricing =
                    prefer_existing_pricing(&existing.model.pricing, &incoming.pricing);
                let prior_pricing = existing.model.pricing.clone();
                let prior_performance = existing.model.performance.clone();
                existing.model = incoming;
                if keep_pricing {
                    existing.model.pricing = prior_pricing;
                }
                // Performance aggregates are owned by the feedback loop, not
                // by discovery.
                existing.model.performance = prior_performance;
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(CatalogEntry {
                    model: incoming,
                    last_seen: now,
                });
            }
        }
    }

    /// Replace the stored performance/availability for a model, if present.
    pub fn update_runtime(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Model),
    ) -> bool {
        let mut entries = self.entries.write().expect("catalog lock poisoned");
        match entries.get_mut(id) {
            Some(entry) => {
                apply(&mut entry.model);
                true
            }
            None => false,
        }
    }

    /// Run discovery and merge results. Errors from individual sources are
    /// logged and skipped; the call fails only when every source fails, and
    /// prior state is left intact either way.
    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let mut discovered: Vec<Model> = Vec::new();
        let mut succeeded = 0usize;
        let mut last_error: Option<anyhow::Error> = None;

        for source in &self.discovery {
            match source.discover().await {
                Ok(models) => {
                    debug!(source = source.name(), count = models.len(), "discovery succeeded");
                    discovered.extend(models);
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "discovery source failed");
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            return Err(last_error
                .unwrap_or_else(|| anyhow::anyhow!("no discovery sources configured")));
        }

        let count = discovered.len();
        for model in discovered {
            self.upsert(model);
        }
        self.drop_stale();
        Ok(count)
    }

    /// Resolve pricing for entries whose `next_update` has passed, walking
    /// sources in order and keeping the highest-precedence answer.
    pub async fn refresh_pricing(&self) -> usize {
        let now = now_unix();
        let due: Vec<Model> = self
            .list()
            .into_iter()
            .filter(|m| m.pricing.next_update <= now)
            .collect();

        let mut updated = 0usize;
        for model in due {
            let mut best: Option<ModelPricing> = None;
            for source in &self.pricing {
                match source.price(&model).await {
                    Ok(Some(pricing)) => {
                        let better = best
                            .as_ref()
                            .map(|b| pricing.source.precedence() > b.source.precedence())
                            .unwrap_or(true);
                        if better {
                            best = Some(pricing);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(source = source.name(), model = %model.id, error = %e, "pricing source failed");
                    }
                }
            }
            if let Some(pricing) = best {
                if !prefer_existing_pricing(&model.pricing, &pricing) {
                    let applied = self.update_runtime(&model.id, |m| m.pricing = pricing);
                    if applied {
                        updated += 1;
                    }
                }
            }
        }
        updated
    }

    fn drop_stale(&self) {
        let now = now_unix();
        let staleness = self.staleness.as_secs();
        let mut entries = self.entries.write().expect("catalog lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| now.saturating_sub(e.last_seen) <= staleness);
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, "dropped stale catalog entries");
        }
    }
}

/// True when the existing pricing record should be kept over the incoming
/// one: strictly higher precedence wins; at equal precedence the newer
/// record wins.
fn prefer_existing_pricing(existing: &ModelPricing, incoming: &ModelPricing) -> bool {
    match existing
        .source
        .precedence()
        .cmp(&incoming.source.precedence())
    {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => existing.refreshed_at > incoming.refreshed_at,
    }
}
