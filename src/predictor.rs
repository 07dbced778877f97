//! Statistical performance prediction and health scoring.
//!
//! The predictor keeps a bounded per-model history of request metrics and
//! answers three questions: what latency/quality/success rate to expect for
//! a `(task, complexity)` pair, how healthy a model is overall, and which
//! models to prefer or avoid for a task right now.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::models::{Complexity, HealthScore, Model, RequestMetric, TaskType, Trend};

/// Latency at which the latency health component reaches zero.
const LATENCY_CEILING_MS: f64 = 10_000.0;

/// Average per-1K cost at which the cost health component reaches zero.
const COST_CEILING_PER_1K: f64 = 0.10;

/// Expected behavior for one `(model, task, complexity)` slice.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Prediction {
    #[serde(rename = "latencyMs")]
    pub latency_ms: f64,
    pub quality: f64,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    /// Grows with sample count: `min(0.95, 0.5 + 0.05 n)`.
    pub confidence: f64,
}

impl Prediction {
    /// Optimistic default for models with no history yet.
    fn cold(model: &Model) -> Self {
        Self {
            latency_ms: model.performance.avg_latency_ms,
            quality: model.performance.quality_score,
            success_rate: model.performance.success_rate,
            confidence: 0.5,
        }
    }
}

/// Task-scoped model recommendation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Recommendation {
    pub primary: Vec<String>,
    pub fallback: Vec<String>,
    pub avoid: Vec<String>,
    pub reasoning: String,
}

/// Recency-weighted statistical predictor.
pub struct Predictor {
    history: RwLock<HashMap<String, VecDeque<RequestMetric>>>,
    max_history: usize,
}

impl Predictor {
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// Append one observation for its model. Metrics without a model id
    /// (pre-selection failures) are not attributable and are skipped.
    pub fn record(&self, metric: RequestMetric) {
        let Some(model_id) = metric.model_id.clone() else {
            return;
        };
        let mut history = self.history.write().expect("predictor lock poisoned");
        let entries = history.entry(model_id).or_default();
        entries.push_back(metric);
        while entries.len() > self.max_history {
            entries.pop_front();
        }
    }

    pub fn sample_count(&self, model_id: &str) -> usize {
        let history = self.history.read().expect("predictor lock poisoned");
        history.get(model_id).map(|h| h.len()).unwrap_or(0)
    }

    /// Predict behavior for a model on a `(task, complexity)` slice.
    ///
    /// Uses recency-weighted means over matching samples; when no sample
    /// matches the filter, the whole history is used; with no history at
    /// all, the catalog's rolling aggregates seed an optimistic default.
    pub fn predict(&self, model: &Model, task: TaskType, complexity: Complexity) -> Prediction {
        let history = self.history.read().expect("predictor lock poisoned");
        let Some(entries) = history.get(&model.id) else {
            return Prediction::cold(model);
        };
        if entries.is_empty() {
            return Prediction::cold(model);
        }

        let filtered: Vec<&RequestMetric> = entries
            .iter()
            .filter(|m| m.task_type == task && m.complexity == complexity)
            .collect();
        let samples: Vec<&RequestMetric> = if filtered.is_empty() {
            entries.iter().collect()
        } else {
            filtered
        };

        // Recency weighting: sample i of n gets weight (i + 1).
        let mut weight_sum = 0.0;
        let mut latency = 0.0;
        let mut quality = 0.0;
        let mut successes = 0.0;
        for (i, m) in samples.iter().enumerate() {
            let w = (i + 1) as f64;
            weight_sum += w;
            latency += w * m.latency_ms as f64;
            if m.is_success() {
                successes += w;
                quality += w * m.quality_signal;
            }
        }
        let success_rate = successes / weight_sum;
        let quality = if successes > 0.0 {
            quality / successes
        } else {
            0.0
        };

        Prediction {
            latency_ms: latency / weight_sum,
            quality,
            success_rate,
            confidence: (0.5 + 0.05 * samples.len() as f64).min(0.95),
        }
    }

    /// Composite health for a model: latency .25, quality .35,
    /// availability .25, cost .15.
    pub fn health(&self, model: &Model) -> HealthScore {
        let prediction = self.predict(model, TaskType::General, Complexity::Moderate);
        let latency = (1.0 - prediction.latency_ms / LATENCY_CEILING_MS).clamp(0.0, 1.0);
        let quality = prediction.quality.clamp(0.0, 1.0);
        let availability =
            (prediction.success_rate * model.availability.uptime).clamp(0.0, 1.0);
        let cost = (1.0 - model.pricing.avg_per_1k() / COST_CEILING_PER_1K).clamp(0.0, 1.0);
        HealthScore::compose(latency, quality, availability, cost, self.trend(&model.id))
    }

    /// Trend from the last 20 samples against the prior 20.
    ///
    /// The combined signal adds normalized latency improvement and quality
    /// delta; above +0.1 is improving, below -0.1 declining.
    pub fn trend(&self, model_id: &str) -> Trend {
        let history = self.history.read().expect("predictor lock poisoned");
        let Some(entries) = history.get(model_id) else {
            return Trend::Stable;
        };
        if entries.len() < 40 {
            return Trend::Stable;
        }

        let recent: Vec<&RequestMetric> = entries.iter().rev().take(20).collect();
        let prior: Vec<&RequestMetric> = entries.iter().rev().skip(20).take(20).collect();

        let mean = |set: &[&RequestMetric]| {
            let n = set.len() as f64;
            let latency: f64 = set.iter().map(|m| m.latency_ms as f64).sum::<f64>() / n;
            let quality: f64 = set.iter().map(|m| m.quality_signal).sum::<f64>() / n;
            (latency, quality)
        };
        let (recent_latency, recent_quality) = mean(&recent);
        let (prior_latency, prior_quality) = mean(&prior);

        let latency_improvement = (prior_latency - recent_latency) / prior_latency.max(1.0);
        let quality_improvement = recent_quality - prior_quality;
        let combined = latency_improvement + quality_improvement;

        if combined > 0.1 {
            Trend::Improving
        } else if combined < -0.1 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Recommend models for a task: primary requires overall health >= 0.6
    /// and cost health >= 0.5; anything with overall < 0.4 or a declining
    /// trend lands in `avoid`. Sorted by overall health descending.
    pub fn recommend(
        &self,
        models: &[Model],
        task: TaskType,
        complexity: Complexity,
        budget: Option<f64>,
    ) -> Recommendation {
        let mut scored: Vec<(String, HealthScore, f64, f64)> = models
            .iter()
            .map(|m| {
                let health = self.health(m);
                let confidence = self.predict(m, task, complexity).confidence;
                (m.id.clone(), health, m.pricing.avg_per_1k(), confidence)
            })
            .collect();
        scored.sort_by(|a, b| b.1.overall.total_cmp(&a.1.overall));

        let mut primary = Vec::new();
        let mut fallback = Vec::new();
        let mut avoid = Vec::new();
        for (id, health, avg_cost, confidence) in &scored {
            let over_budget = budget.map(|b| *avg_cost > b).unwrap_or(false);
            // Health-based avoidance requires enough samples to be a verdict
            // rather than cold-start noise; budget violations are factual.
            let confident = *confidence >= 0.7;
            if over_budget
                || (confident && (health.overall < 0.4 || health.trend == Trend::Declining))
            {
                avoid.push(id.clone());
            } else if health.overall >= 0.6 && health.cost >= 0.5 {
                primary.push(id.clone());
            } else {
                fallback.push(id.clone());
            }
        }

        let reasoning = format!(
            "{} task at {} complexity: {} primary, {} fallback, {} avoided of {} models",
            task,
            complexity,
            primary.len(),
            fallback.len(),
            avoid.len(),
            scored.len()
        );
        Recommendation {
            primary,
            fallback,
            avoid,
            reasoning,
        }
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}
