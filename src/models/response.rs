use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;

use super::classification::Complexity;

/// Token accounting for one exchange.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

/// Routing metadata attached to every successful response.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "processingTimeMs")]
    pub processing_time_ms: u64,
    #[serde(rename = "useCase")]
    pub use_case: Option<String>,
    pub complexity: Complexity,
    #[serde(rename = "cacheHit")]
    pub cache_hit: Option<bool>,
    #[serde(rename = "semanticHit")]
    pub semantic_hit: Option<bool>,
    #[serde(rename = "fallbackExhausted")]
    pub fallback_exhausted: Option<bool>,
}

/// The routed response returned to the caller (and stored in the cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub id: String,
    pub content: String,
    /// Identifier of the model that produced the content.
    pub model: String,
    pub tokens: TokenUsage,
    /// Estimated spend for this exchange in USD.
    pub cost: f64,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    /// Quality estimate in [0, 1] from the performance predictor.
    pub quality: f64,
    /// Unix seconds at response creation.
    pub timestamp: u64,
    pub metadata: ResponseMetadata,
}

/// Aggregated router counters served by the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteStats {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    /// Terminal outcome counts keyed by outcome kind.
    pub outcomes: HashMap<String, u64>,
    /// Successful executions per model id.
    #[serde(rename = "modelUsage")]
    pub model_usage: HashMap<String, u64>,
    #[serde(rename = "cacheHits")]
    pub cache_hits: u64,
    #[serde(rename = "semanticHits")]
    pub semantic_hits: u64,
    #[serde(rename = "cacheHitRate")]
    pub cache_hit_rate: f64,
    /// Circuit status per model id ("closed" | "open" | "half-open").
    pub circuits: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_totals() {
        let t = TokenUsage::new(120, 30);
        assert_eq!(t.total, 150);
    }

    #[test]
    fn metadata_omits_unset_flags() {
        let meta = ResponseMetadata {
            request_id: "r1".into(),
            processing_time_ms: 5,
            use_case: None,
            complexity: Complexity::Simple,
            cache_hit: None,
            semantic_hit: None,
            fallback_exhausted: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("cacheHit").is_none());
        assert!(json.get("fallbackExhausted").is_none());
        assert_eq!(json["complexity"], "simple");
    }
}
