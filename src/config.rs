//! Router configuration: environment variables plus the routing-table file.
//!
//! The routing table is a JSON document holding per-task thresholds and the
//! seed model list. Everything else is environment-driven with compiled-in
//! defaults, matching the deployment contract:
//!
//! Required:
//! - MODELGATE_ROUTING_TABLE   path to the routing-table JSON file
//! - MODELGATE_CACHE_MAX_BYTES
//! - MODELGATE_CACHE_MAX_ENTRIES
//!
//! Optional (defaults in parentheses):
//! - MODELGATE_CACHE_TTL_MS (300000), MODELGATE_SEMANTIC_THRESHOLD (0.8),
//!   MODELGATE_SEMANTIC_SCAN_CAP (256), MODELGATE_CACHE_EVICTION (adaptive)
//! - MODELGATE_CB_FAILURE_THRESHOLD (5), MODELGATE_CB_SUCCESS_THRESHOLD (2),
//!   MODELGATE_CB_TIMEOUT_MS (30000), MODELGATE_CB_WINDOW_MS (300000),
//!   MODELGATE_CB_MIN_REQUESTS (5)
//! - MODELGATE_REQUEST_DEADLINE_MS (30000), MODELGATE_UPSTREAM_TIMEOUT_MS (15000)
//! - MODELGATE_MAX_PROMPT_LEN (100000)
//! - MODELGATE_SEMANTIC_CLASSIFIER_URL (disabled when unset)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::cache::EvictionPolicy;
use crate::circuit::CircuitBreakerConfig;
use crate::models::{
    Capability, Model, ModelAvailability, ModelPerformance, ModelPricing, PricingSourceKind,
    TaskType,
};
use crate::util::{env_parse, env_required, now_unix};

/// Quality/latency/cost thresholds for one task type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskThresholds {
    #[serde(rename = "minQuality")]
    pub min_quality: f64,
    #[serde(rename = "maxLatencyMs")]
    pub max_latency_ms: u64,
    /// Maximum average cost per 1K tokens in USD.
    #[serde(rename = "maxCostPer1K")]
    pub max_cost_per_1k: f64,
}

/// Routing-table entry for one task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRoute {
    /// Preferred model ids, in order.
    #[serde(default)]
    pub primary: Vec<String>,
    /// Fallback model ids, in order.
    #[serde(default)]
    pub fallback: Vec<String>,
    pub thresholds: TaskThresholds,
}

/// Seed entry for the model catalog, loaded from the routing-table file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSeed {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(rename = "inputPer1K")]
    pub input_per_1k: f64,
    #[serde(rename = "outputPer1K")]
    pub output_per_1k: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub fallback: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ModelSeed {
    /// Materialize the seed into a full catalog entry with default
    /// performance/availability and rate-sheet pricing provenance.
    pub fn into_model(self) -> Model {
        let now = now_unix();
        Model {
            display_name: self.display_name.clone().unwrap_or_else(|| self.id.clone()),
            id: self.id,
            provider: self.provider,
            capabilities: self.capabilities,
            pricing: ModelPricing {
                input_per_1k: self.input_per_1k,
                output_per_1k: self.output_per_1k,
                currency: "USD".into(),
                source: PricingSourceKind::RateSheet,
                confidence: 0.8,
                refreshed_at: now,
                next_update: now + 3600,
            },
            performance: ModelPerformance::default(),
            availability: ModelAvailability::default(),
            enabled: self.enabled,
            fallback: self.fallback,
        }
    }
}

/// The routing-table document: task thresholds plus catalog seeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default)]
    pub tasks: HashMap<String, TaskRoute>,
    #[serde(default)]
    pub models: Vec<ModelSeed>,
}

impl RoutingTable {
    /// Load from a JSON file.
    pub fn load_from_file(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Compiled-in defaults for the threshold table. Model seeds are empty;
    /// a deployment supplies them via the routing-table file or discovery.
    pub fn defaults() -> Self {
        let mut tasks = HashMap::new();
        let mut add = |task: TaskType, quality: f64, latency: u64, cost: f64| {
            tasks.insert(
                task.as_str().to_string(),
                TaskRoute {
                    primary: Vec::new(),
                    fallback: Vec::new(),
                    thresholds: TaskThresholds {
                        min_quality: quality,
                        max_latency_ms: latency,
                        max_cost_per_1k: cost,
                    },
                },
            );
        };
        add(TaskType::ComplexReasoning, 0.80, 10_000, 0.10);
        add(TaskType::RagOperations, 0.70, 15_000, 0.08);
        add(TaskType::FastResponse, 0.60, 5_000, 0.05);
        add(TaskType::CostSensitive, 0.50, 20_000, 0.03);
        add(TaskType::General, 0.60, 15_000, 0.05);
        Self {
            tasks,
            models: Vec::new(),
        }
    }

    /// Thresholds for a task, falling back to the `general` row.
    pub fn thresholds_for(&self, task: TaskType) -> TaskThresholds {
        self.tasks
            .get(task.as_str())
            .or_else(|| self.tasks.get(TaskType::General.as_str()))
            .map(|r| r.thresholds)
            .unwrap_or(TaskThresholds {
                min_quality: 0.6,
                max_latency_ms: 15_000,
                max_cost_per_1k: 0.05,
            })
    }

    pub fn route_for(&self, task: TaskType) -> Option<&TaskRoute> {
        self.tasks
            .get(task.as_str())
            .or_else(|| self.tasks.get(TaskType::General.as_str()))
    }
}

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_bytes: usize,
    pub max_entries: usize,
    pub default_ttl: Duration,
    pub semantic_threshold: f64,
    pub semantic_scan_cap: usize,
    pub policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_entries: 4096,
            default_ttl: Duration::from_secs(300),
            semantic_threshold: 0.8,
            semantic_scan_cap: 256,
            policy: EvictionPolicy::Adaptive,
        }
    }
}

/// Feedback-loop schedules.
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub catalog_refresh: Duration,
    pub pricing_refresh: Duration,
    pub health_recompute: Duration,
    pub circuit_cleanup: Duration,
    /// Circuit entries idle longer than this are dropped.
    pub circuit_idle_max: Duration,
    pub cache_sweep: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            catalog_refresh: Duration::from_secs(300),
            pricing_refresh: Duration::from_secs(3600),
            health_recompute: Duration::from_secs(60),
            circuit_cleanup: Duration::from_secs(3600),
            circuit_idle_max: Duration::from_secs(6 * 3600),
            cache_sweep: Duration::from_secs(30),
        }
    }
}

/// Full router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub routing_table: RoutingTable,
    pub cache: CacheConfig,
    pub circuit: CircuitBreakerConfig,
    pub request_deadline: Duration,
    pub upstream_timeout: Duration,
    pub max_prompt_len: usize,
    pub semantic_classifier_url: Option<String>,
    pub feedback: FeedbackConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            routing_table: RoutingTable::defaults(),
            cache: CacheConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            request_deadline: Duration::from_secs(30),
            upstream_timeout: Duration::from_secs(15),
            max_prompt_len: 100_000,
            semantic_classifier_url: None,
            feedback: FeedbackConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Build from the environment. Errors name the missing mandatory variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let table_path = env_required("MODELGATE_ROUTING_TABLE")?;
        let routing_table = RoutingTable::load_from_file(&table_path)
            .map_err(|e| anyhow::anyhow!("failed to load routing table {table_path}: {e}"))?;

        let max_bytes: usize = env_required("MODELGATE_CACHE_MAX_BYTES")?
            .parse()
            .map_err(|e| anyhow::anyhow!("MODELGATE_CACHE_MAX_BYTES: {e}"))?;
        let max_entries: usize = env_required("MODELGATE_CACHE_MAX_ENTRIES")?
            .parse()
            .map_err(|e| anyhow::anyhow!("MODELGATE_CACHE_MAX_ENTRIES: {e}"))?;

        let policy = std::env::var("MODELGATE_CACHE_EVICTION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(EvictionPolicy::Adaptive);

        Ok(Self {
            routing_table,
            cache: CacheConfig {
                max_bytes,
                max_entries,
                default_ttl: Duration::from_millis(env_parse("MODELGATE_CACHE_TTL_MS", 300_000)),
                semantic_threshold: env_parse("MODELGATE_SEMANTIC_THRESHOLD", 0.8),
                semantic_scan_cap: env_parse("MODELGATE_SEMANTIC_SCAN_CAP", 256),
                policy,
            },
            circuit: CircuitBreakerConfig {
                failure_threshold: env_parse("MODELGATE_CB_FAILURE_THRESHOLD", 5),
                success_threshold: env_parse("MODELGATE_CB_SUCCESS_THRESHOLD", 2),
                timeout: Duration::from_millis(env_parse("MODELGATE_CB_TIMEOUT_MS", 30_000)),
                window: Duration::from_millis(env_parse("MODELGATE_CB_WINDOW_MS", 300_000)),
                min_request_count: env_parse("MODELGATE_CB_MIN_REQUESTS", 5),
            },
            request_deadline: Duration::from_millis(env_parse(
                "MODELGATE_REQUEST_DEADLINE_MS",
                30_000,
            )),
            upstream_timeout: Duration::from_millis(env_parse(
                "MODELGATE_UPSTREAM_TIMEOUT_MS",
                15_000,
            )),
            max_prompt_len: env_parse("MODELGATE_MAX_PROMPT_LEN", 100_000),
            semantic_classifier_url: std::env::var("MODELGATE_SEMANTIC_CLASSIFIER_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            feedback: FeedbackConfig::default(),
        })
    }
}
