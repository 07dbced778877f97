//! Candidate selection: deterministic, explainable assembly of the ordered
//! model list for one classified request.
//!
//! The policy filters the catalog snapshot down to routable models, applies
//! capability containment, walks the task table with its thresholds, gates
//! on predicted success rate, and breaks ties by quality, then cost, then
//! latency. An empty result relaxes thresholds one step at a time (cost,
//! latency, quality) before falling back to the best available model
//! regardless of the table.

use tracing::debug;

use crate::circuit::CircuitBreaker;
use crate::config::{RoutingTable, TaskThresholds};
use crate::models::{Capability, Classification, Model};
use crate::predictor::{Prediction, Predictor};

/// Where in the selection a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateTier {
    Primary,
    Fallback,
    /// Admitted only after threshold relaxation.
    Relaxed,
    /// Admitted ignoring the task table entirely.
    BestAvailable,
}

/// A model eligible to serve the current request.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: Model,
    pub prediction: Prediction,
    pub tier: CandidateTier,
}

/// Success-rate gates for table candidates.
const PRIMARY_SUCCESS_GATE: f64 = 0.8;
const FALLBACK_SUCCESS_GATE: f64 = 0.7;

/// Predictions below this confidence (fewer than four samples) do not gate:
/// a single early failure must not eclipse a candidate before the circuit
/// breaker has seen enough traffic to judge it.
const CONFIDENT_PREDICTION: f64 = 0.7;

/// Routing policy over a task-type table.
pub struct Policy {
    table: RoutingTable,
}

impl Policy {
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Assemble the ordered candidate list for a classification.
    pub fn select(
        &self,
        classification: &Classification,
        catalog: &[Model],
        predictor: &Predictor,
        breaker: &CircuitBreaker,
    ) -> Vec<Candidate> {
        let recommendation = predictor.recommend(
            catalog,
            classification.task_type,
            classification.complexity,
            None,
        );

        // Step 1-2: routable, circuit not open, not avoided, capabilities.
        let eligible: Vec<&Model> = catalog
            .iter()
            .filter(|m| m.is_routable())
            .filter(|m| !breaker.is_open(&m.id))
            .filter(|m| !recommendation.avoid.contains(&m.id))
            .filter(|m| self.capabilities_satisfied(classification, m))
            .collect();

        if eligible.is_empty() {
            debug!("no eligible models after availability/capability filtering");
            return Vec::new();
        }

        let thresholds = self.table.thresholds_for(classification.task_type);

        // Step 3-5 at the configured thresholds, then progressively relaxed:
        // cost, then latency, then quality, one step each.
        let steps = [
            (thresholds, CandidateTier::Primary),
            (relax_cost(thresholds), CandidateTier::Relaxed),
            (relax_latency(relax_cost(thresholds)), CandidateTier::Relaxed),
            (
                relax_quality(relax_latency(relax_cost(thresholds))),
                CandidateTier::Relaxed,
            ),
        ];
        for (step_thresholds, relaxed_tier) in steps {
            let candidates =
                self.select_from_table(classification, &eligible, predictor, step_thresholds);
            if !candidates.is_empty() {
                let candidates = if relaxed_tier == CandidateTier::Relaxed {
                    candidates
                        .into_iter()
                        .map(|mut c| {
                            c.tier = CandidateTier::Relaxed;
                            c
                        })
                        .collect()
                } else {
                    candidates
                };
                return candidates;
            }
        }

        // Step 6: best available regardless of the task table.
        debug!(
            task = %classification.task_type,
            "task table produced no candidates, using best available"
        );
        let mut best: Vec<Candidate> = eligible
            .iter()
            .map(|m| Candidate {
                model: (*m).clone(),
                prediction: predictor.predict(
                    m,
                    classification.task_type,
                    classification.complexity,
                ),
                tier: CandidateTier::BestAvailable,
            })
            .collect();
        sort_candidates(&mut best);
        best
    }

    fn capabilities_satisfied(&self, classification: &Classification, model: &Model) -> bool {
        if classification.requires_multimodal && !model.has(Capability::Multimodal) {
            return false;
        }
        if classification.requires_rag
            && !(model.has(Capability::Rag) || model.has(Capability::AdvancedRag))
        {
            return false;
        }
        if classification.requires_code_generation && !model.has(Capability::CodeGeneration) {
            return false;
        }
        true
    }

    fn select_from_table(
        &self,
        classification: &Classification,
        eligible: &[&Model],
        predictor: &Predictor,
        thresholds: TaskThresholds,
    ) -> Vec<Candidate> {
        let Some(route) = self.table.route_for(classification.task_type) else {
            return Vec::new();
        };

        let lookup = |id: &str| eligible.iter().find(|m| m.id == id).copied();

        let mut primaries = Vec::new();
        for id in &route.primary {
            if let Some(model) = lookup(id) {
                if let Some(candidate) = self.admit(
                    classification,
                    model,
                    predictor,
                    thresholds,
                    CandidateTier::Primary,
                    PRIMARY_SUCCESS_GATE,
                ) {
                    primaries.push(candidate);
                }
            }
        }

        let mut fallbacks = Vec::new();
        for id in &route.fallback {
            if route.primary.contains(id) {
                continue;
            }
            if let Some(model) = lookup(id) {
                if let Some(candidate) = self.admit(
                    classification,
                    model,
                    predictor,
                    thresholds,
                    CandidateTier::Fallback,
                    FALLBACK_SUCCESS_GATE,
                ) {
                    fallbacks.push(candidate);
                }
            }
        }

        sort_candidates(&mut primaries);
        sort_candidates(&mut fallbacks);
        primaries.extend(fallbacks);
        primaries
    }

    fn admit(
        &self,
        classification: &Classification,
        model: &Model,
        predictor: &Predictor,
        thresholds: TaskThresholds,
        tier: CandidateTier,
        success_gate: f64,
    ) -> Option<Candidate> {
        if model.performance.quality_score < thresholds.min_quality {
            return None;
        }
        if model.performance.avg_latency_ms > thresholds.max_latency_ms as f64 {
            return None;
        }
        if model.pricing.avg_per_1k() > thresholds.max_cost_per_1k {
            return None;
        }
        let prediction =
            predictor.predict(model, classification.task_type, classification.complexity);
        if prediction.confidence >= CONFIDENT_PREDICTION && prediction.success_rate < success_gate {
            return None;
        }
        Some(Candidate {
            model: model.clone(),
            prediction,
            tier,
        })
    }
}

/// Deterministic tie-break: quality desc, average per-token cost asc,
/// average latency asc, id asc as the final stabilizer.
fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.model
            .performance
            .quality_score
            .total_cmp(&a.model.performance.quality_score)
            .then_with(|| {
                a.model
                    .pricing
                    .avg_per_1k()
                    .total_cmp(&b.model.pricing.avg_per_1k())
            })
            .then_with(|| {
                a.model
                    .performance
                    .avg_latency_ms
                    .total_cmp(&b.model.performance.avg_latency_ms)
            })
            .then_with(|| a.model.id.cmp(&b.model.id))
    });
}

fn relax_cost(t: TaskThresholds) -> TaskThresholds {
    TaskThresholds {
        max_cost_per_1k: t.max_cost_per_1k * 1.5,
        ..t
    }
}

fn relax_latency(t: TaskThresholds) -> TaskThresholds {
    TaskThresholds {
        max_latency_ms: (t.max_latency_ms as f64 * 1.5) as u64,
        ..t
    }
}

fn relax_quality(t: TaskThresholds) -> TaskThresholds {
    TaskThresholds {
        min_quality: (t.min_quality - 0.1).max(0.0),
        ..t
    }
}
