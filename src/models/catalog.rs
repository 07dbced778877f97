use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;

/// Provider-agnostic model ability tag.
///
/// Policy's capability filter is a set-containment check over these tags.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    TextGeneration,
    CodeGeneration,
    Rag,
    AdvancedRag,
    Multimodal,
    ComplexReasoning,
    FastResponse,
    DocumentProcessing,
}

/// Where a pricing record came from, in decreasing order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PricingSourceKind {
    /// Provider billing API.
    BillingApi,
    /// Provider public rate sheet.
    RateSheet,
    /// Heuristic derived from the model name.
    Heuristic,
    /// Compiled-in static default.
    Default,
}

impl PricingSourceKind {
    /// Higher wins when merging records for the same model.
    pub fn precedence(&self) -> u8 {
        match self {
            PricingSourceKind::BillingApi => 3,
            PricingSourceKind::RateSheet => 2,
            PricingSourceKind::Heuristic => 1,
            PricingSourceKind::Default => 0,
        }
    }
}

/// Per-model pricing record. All prices per 1K tokens in `currency`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(rename = "inputPer1K")]
    pub input_per_1k: f64,
    #[serde(rename = "outputPer1K")]
    pub output_per_1k: f64,
    pub currency: String,
    pub source: PricingSourceKind,
    /// Confidence in [0, 1] that the record reflects actual billing.
    pub confidence: f64,
    /// Unix seconds of the last refresh.
    #[serde(rename = "refreshedAt")]
    pub refreshed_at: u64,
    /// Unix seconds after which the record should be refreshed.
    #[serde(rename = "nextUpdate")]
    pub next_update: u64,
}

impl ModelPricing {
    /// Average cost per 1K tokens assuming balanced input/output.
    pub fn avg_per_1k(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }

    /// Cost of a concrete exchange.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Rolling performance aggregates for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: f64,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "qualityScore")]
    pub quality_score: f64,
    /// Requests per minute the model has been observed to sustain.
    pub throughput: f64,
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
}

impl Default for ModelPerformance {
    fn default() -> Self {
        Self {
            avg_latency_ms: 2000.0,
            success_rate: 1.0,
            quality_score: 0.7,
            throughput: 0.0,
            updated_at: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    #[default]
    Online,
    Offline,
    Degraded,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAvailability {
    pub status: AvailabilityStatus,
    /// Fraction of recent checks that found the model reachable.
    pub uptime: f64,
    #[serde(rename = "lastCheck")]
    pub last_check: u64,
}

impl Default for ModelAvailability {
    fn default() -> Self {
        Self {
            status: AvailabilityStatus::Online,
            uptime: 1.0,
            last_check: 0,
        }
    }
}

/// A routable upstream model as held by the catalog.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Provider tag, e.g. "openai", "anthropic", "vertex".
    pub provider: String,
    pub capabilities: BTreeSet<Capability>,
    pub pricing: ModelPricing,
    pub performance: ModelPerformance,
    pub availability: ModelAvailability,
    pub enabled: bool,
    /// Default fallback model id, if the provider designates one.
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Model {
    /// Whether the model may currently be selected for execution.
    pub fn is_routable(&self) -> bool {
        self.enabled && self.availability.status == AvailabilityStatus::Online
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// Direction of a model's recent performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Composite per-model health. All components in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub latency: f64,
    pub quality: f64,
    pub availability: f64,
    pub cost: f64,
    pub overall: f64,
    pub trend: Trend,
}

impl HealthScore {
    /// Weighted composite: latency .25, quality .35, availability .25, cost .15.
    pub fn compose(latency: f64, quality: f64, availability: f64, cost: f64, trend: Trend) -> Self {
        let overall = 0.25 * latency + 0.35 * quality + 0.25 * availability + 0.15 * cost;
        Self {
            latency,
            quality,
            availability,
            cost,
            overall,
            trend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_precedence_ordering() {
        assert!(PricingSourceKind::BillingApi.precedence() > PricingSourceKind::RateSheet.precedence());
        assert!(PricingSourceKind::RateSheet.precedence() > PricingSourceKind::Heuristic.precedence());
        assert!(PricingSourceKind::Heuristic.precedence() > PricingSourceKind::Default.precedence());
    }

    #[test]
    fn exchange_cost() {
        let p = ModelPricing {
            input_per_1k: 0.01,
            output_per_1k: 0.03,
            currency: "USD".into(),
            source: PricingSourceKind::RateSheet,
            confidence: 0.9,
            refreshed_at: 0,
            next_update: 0,
        };
        let cost = p.cost(2000, 1000);
        assert!((cost - 0.05).abs() < 1e-9);
        assert!((p.avg_per_1k() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn health_overall_weighting() {
        let h = HealthScore::compose(1.0, 1.0, 1.0, 1.0, Trend::Stable);
        assert!((h.overall - 1.0).abs() < 1e-9);
        let h = HealthScore::compose(0.0, 1.0, 0.0, 0.0, Trend::Stable);
        assert!((h.overall - 0.35).abs() < 1e-9);
    }
}
