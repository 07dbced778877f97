use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::classification::{Complexity, TaskType};

/// Terminal outcome of one routed request.
///
/// Every request records exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Ok,
    SafetyBlock,
    RoutingFailure,
    CircuitOpen,
    UpstreamError,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::SafetyBlock => "safety-block",
            Outcome::RoutingFailure => "routing-failure",
            Outcome::CircuitOpen => "circuit-open",
            Outcome::UpstreamError => "upstream-error",
            Outcome::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed execution, fed to the predictor and the stats counters.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    /// Model that served (or failed) the request; absent for failures that
    /// happened before model selection.
    #[serde(rename = "modelId")]
    pub model_id: Option<String>,
    /// Unix seconds when the attempt started.
    #[serde(rename = "startedAt")]
    pub started_at: u64,
    #[serde(rename = "endedAt")]
    pub ended_at: u64,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    pub cost: f64,
    /// Quality estimate in [0, 1] for successful exchanges.
    #[serde(rename = "qualitySignal")]
    pub quality_signal: f64,
    pub outcome: Outcome,
    /// Classification context for prediction filtering.
    #[serde(rename = "taskType")]
    pub task_type: TaskType,
    pub complexity: Complexity,
}

impl RequestMetric {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}
