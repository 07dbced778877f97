//! Request classification: a tiered pipeline with deterministic rules first
//! and an optional semantic tier second.
//!
//! The rule tier is cost-free and always runs: keyword lexicons, curated
//! regex patterns, size heuristics, and attachment-derived signals. The
//! semantic tier, when configured, calls an external classifier; its output
//! supersedes the rule tier above a confidence threshold, otherwise the two
//! are merged (semantic wins domain/task, rules keep complexity while the
//! semantic confidence stays below 0.6).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::models::{
    Attachment, AttachmentKind, Classification, Complexity, Domain, Priority, RouteRequest,
    TaskType,
};

/// Attachment aggregate size that forces expert complexity.
const EXPERT_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Structured output of the semantic tier.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SemanticVerdict {
    pub domain: Domain,
    #[serde(rename = "taskType")]
    pub task_type: TaskType,
    pub complexity: Complexity,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub confidence: f64,
    #[serde(rename = "requiresMultimodal", default)]
    pub requires_multimodal: bool,
    #[serde(rename = "requiresRag", default)]
    pub requires_rag: bool,
    #[serde(rename = "requiresCodeGeneration", default)]
    pub requires_code_generation: bool,
}

/// External semantic classifier seam.
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn classify(&self, content: &str) -> anyhow::Result<SemanticVerdict>;
}

/// Semantic tier backed by an HTTP endpoint returning a `SemanticVerdict`.
pub struct HttpSemanticClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpSemanticClassifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SemanticClassifier for HttpSemanticClassifier {
    async fn classify(&self, content: &str) -> anyhow::Result<SemanticVerdict> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("semantic classifier returned {}", resp.status());
        }
        Ok(resp.json::<SemanticVerdict>().await?)
    }
}

struct DomainLexicon {
    domain: Domain,
    keywords: &'static [&'static str],
}

static DOMAIN_LEXICON: &[DomainLexicon] = &[
    DomainLexicon {
        domain: Domain::Technical,
        keywords: &[
            "code", "function", "api", "bug", "compile", "deploy", "server", "database", "kernel",
            "algorithm", "refactor", "stack trace", "typescript", "rust", "python",
        ],
    },
    DomainLexicon {
        domain: Domain::Financial,
        keywords: &[
            "revenue", "invoice", "portfolio", "stock", "tax", "budget", "forecast", "earnings",
            "profit", "cash flow", "valuation",
        ],
    },
    DomainLexicon {
        domain: Domain::Legal,
        keywords: &[
            "contract", "clause", "liability", "compliance", "statute", "regulation", "gdpr",
            "lawsuit", "jurisdiction", "nda",
        ],
    },
    DomainLexicon {
        domain: Domain::Healthcare,
        keywords: &[
            "patient", "diagnosis", "clinical", "symptom", "treatment", "dosage", "medical",
            "hipaa", "prescription",
        ],
    },
    DomainLexicon {
        domain: Domain::Creative,
        keywords: &[
            "story", "poem", "novel", "lyrics", "screenplay", "character arc", "fiction",
            "creative writing",
        ],
    },
    DomainLexicon {
        domain: Domain::Research,
        keywords: &[
            "literature review", "hypothesis", "methodology", "citation", "peer review", "study",
            "experiment", "dataset",
        ],
    },
    DomainLexicon {
        domain: Domain::Education,
        keywords: &[
            "lesson", "curriculum", "quiz", "homework", "explain to a beginner", "teach",
            "syllabus", "student",
        ],
    },
];

struct TaskPattern {
    task: TaskType,
    weight: f64,
    regex: &'static Lazy<Regex>,
}

macro_rules! lazy_re {
    ($pat:expr) => {{
        static RE: Lazy<Regex> = Lazy::new(|| Regex::new($pat).unwrap());
        &RE
    }};
}

static TASK_PATTERNS: Lazy<Vec<TaskPattern>> = Lazy::new(|| {
    vec![
        TaskPattern {
            task: TaskType::CodeGeneration,
            weight: 2.0,
            regex: lazy_re!(r"```|(?i)\b(write|implement|fix|refactor)\b.{0,40}\b(function|code|class|module|script|test)\b"),
        },
        TaskPattern {
            task: TaskType::ComplexReasoning,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(step[- ]by[- ]step|prove|derive|trade[- ]?offs?|reason about|analyze the implications)\b"),
        },
        TaskPattern {
            task: TaskType::StrategicPlanning,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(roadmap|strategy|strategic plan|quarterly plan|go[- ]to[- ]market)\b"),
        },
        TaskPattern {
            task: TaskType::ResearchAnalysis,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(literature review|survey of|state of the art|compare studies|research summary)\b"),
        },
        TaskPattern {
            task: TaskType::RagOperations,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(knowledge base|search (the|our) documents|retrieve relevant|from the corpus|cited sources)\b"),
        },
        TaskPattern {
            task: TaskType::CreativeGeneration,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(write (a|an|the) (story|poem|song|screenplay)|creative piece|in the style of)\b"),
        },
        TaskPattern {
            task: TaskType::FastResponse,
            weight: 1.0,
            regex: lazy_re!(r"(?i)\b(quick(ly)?|briefly|one[- ]liner|short answer|tl;?dr)\b"),
        },
        TaskPattern {
            task: TaskType::CostSensitive,
            weight: 1.0,
            regex: lazy_re!(r"(?i)\b(cheapest|low[- ]cost|minimi[sz]e cost|on a budget)\b"),
        },
        TaskPattern {
            task: TaskType::Multimodal,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(image|picture|photo|diagram|screenshot|chart)\b"),
        },
        TaskPattern {
            task: TaskType::BusinessIntelligence,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(kpi|dashboard|quarterly metrics|business intelligence|pipeline report)\b"),
        },
        TaskPattern {
            task: TaskType::DocumentProcessing,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(summarize (this|the) (document|pdf|report)|extract (fields|tables|data) from)\b"),
        },
        TaskPattern {
            task: TaskType::TechnicalDocs,
            weight: 1.5,
            regex: lazy_re!(r"(?i)\b(api documentation|readme|docstring|reference manual|changelog)\b"),
        },
    ]
});

/// Score at which a lexicon/pattern winner is accepted over `General`.
const WIN_THRESHOLD: f64 = 1.0;

/// Tiered request classifier.
pub struct Classifier {
    semantic: Option<Arc<dyn SemanticClassifier>>,
    /// Semantic output replaces the rule tier above this confidence.
    semantic_override_threshold: f64,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            semantic: None,
            semantic_override_threshold: 0.8,
        }
    }

    pub fn with_semantic(mut self, tier: Arc<dyn SemanticClassifier>, threshold: f64) -> Self {
        self.semantic = Some(tier);
        self.semantic_override_threshold = threshold;
        self
    }

    /// Full classification: rule tier, then the semantic tier when enabled.
    ///
    /// `content` is the sanitized payload; the raw request supplies hints
    /// and attachments.
    pub async fn classify(&self, req: &RouteRequest, content: &str) -> Classification {
        let rules = self.classify_rules(req, content);

        let Some(semantic) = &self.semantic else {
            return rules;
        };

        match semantic.classify(content).await {
            Ok(verdict) => self.merge(req, rules, verdict),
            Err(e) => {
                tracing::warn!(error = %e, "semantic tier failed, keeping rule classification");
                rules
            }
        }
    }

    /// Deterministic rule tier. Also used to derive the cache fingerprint
    /// before the semantic tier runs.
    pub fn classify_rules(&self, req: &RouteRequest, content: &str) -> Classification {
        if content.trim().is_empty() && req.attachments.is_empty() {
            return Classification::fallback();
        }

        let lower = content.to_lowercase();
        let mut reasons: Vec<String> = Vec::new();

        let (domain, domain_score) = score_domain(&lower, &req.attachments, &mut reasons);
        let (task_type, task_score) =
            score_task(content, &lower, req.hints.use_case.as_deref(), &mut reasons);
        let complexity = estimate_complexity(&lower, req, &mut reasons);
        let priority = req.hints.priority.unwrap_or_default();

        let requires_multimodal = task_type == TaskType::Multimodal
            || req
                .attachments
                .iter()
                .any(|a| a.kind() == AttachmentKind::Image);
        let requires_rag = task_type == TaskType::RagOperations;
        let requires_code_generation =
            task_type == TaskType::CodeGeneration || req.attachments.iter().any(Attachment::is_code);

        let estimated_tokens = estimate_tokens(content, complexity, &req.attachments);

        // Confidence grows with the strength of the winning signals.
        let confidence = (0.4 + 0.1 * domain_score + 0.15 * task_score).min(0.9);

        Classification {
            domain,
            task_type,
            complexity,
            priority,
            requires_multimodal,
            requires_rag,
            requires_code_generation,
            estimated_tokens,
            confidence,
            reasoning: reasons.join("; "),
        }
    }

    fn merge(
        &self,
        req: &RouteRequest,
        rules: Classification,
        semantic: SemanticVerdict,
    ) -> Classification {
        let mut out = if semantic.confidence >= self.semantic_override_threshold {
            Classification {
                domain: semantic.domain,
                task_type: semantic.task_type,
                complexity: semantic.complexity,
                priority: semantic.priority.unwrap_or(rules.priority),
                requires_multimodal: semantic.requires_multimodal || rules.requires_multimodal,
                requires_rag: semantic.requires_rag || rules.requires_rag,
                requires_code_generation: semantic.requires_code_generation
                    || rules.requires_code_generation,
                estimated_tokens: rules.estimated_tokens,
                confidence: semantic.confidence,
                reasoning: format!("semantic tier (confidence {:.2})", semantic.confidence),
            }
        } else {
            // Merge: semantic wins domain/task, rules keep complexity while
            // the semantic tier stays below 0.6.
            let complexity = if semantic.confidence < 0.6 {
                rules.complexity
            } else {
                semantic.complexity
            };
            Classification {
                domain: semantic.domain,
                task_type: semantic.task_type,
                complexity,
                priority: rules.priority,
                requires_multimodal: semantic.requires_multimodal || rules.requires_multimodal,
                requires_rag: semantic.requires_rag || rules.requires_rag,
                requires_code_generation: semantic.requires_code_generation
                    || rules.requires_code_generation,
                estimated_tokens: rules.estimated_tokens,
                confidence: (rules.confidence + semantic.confidence) / 2.0,
                reasoning: format!(
                    "merged rule/semantic tiers ({}; semantic confidence {:.2})",
                    rules.reasoning, semantic.confidence
                ),
            }
        };

        // Attachment facts hold regardless of tier.
        if req.attachment_bytes() > EXPERT_ATTACHMENT_BYTES {
            out.complexity = Complexity::Expert;
        }
        out
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn score_domain(
    lower: &str,
    attachments: &[Attachment],
    reasons: &mut Vec<String>,
) -> (Domain, f64) {
    // Code attachments are a decisive technical signal.
    if attachments.iter().any(Attachment::is_code) {
        reasons.push("code attachment forces technical domain".into());
        return (Domain::Technical, 3.0);
    }

    let mut best = (Domain::General, 0.0f64);
    for lexicon in DOMAIN_LEXICON {
        let score: f64 = lexicon
            .keywords
            .iter()
            .filter(|k| lower.contains(*k))
            .count() as f64;
        if score > best.1 {
            best = (lexicon.domain, score);
        }
    }
    if best.1 >= WIN_THRESHOLD {
        reasons.push(format!("domain {} ({} keyword hits)", best.0, best.1 as u64));
        best
    } else {
        (Domain::General, 0.0)
    }
}

fn score_task(
    content: &str,
    lower: &str,
    use_case: Option<&str>,
    reasons: &mut Vec<String>,
) -> (TaskType, f64) {
    // An explicit useCase hint is a direct signal.
    if let Some(task) = use_case.and_then(TaskType::parse) {
        reasons.push(format!("useCase hint {task}"));
        return (task, 3.0);
    }

    let mut scores: std::collections::HashMap<TaskType, f64> = std::collections::HashMap::new();
    for p in TASK_PATTERNS.iter() {
        if p.regex.is_match(content) || p.regex.is_match(lower) {
            *scores.entry(p.task).or_insert(0.0) += p.weight;
        }
    }

    let best = scores
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str()).reverse()));
    match best {
        Some((task, score)) if score >= WIN_THRESHOLD => {
            reasons.push(format!("task {task} (pattern score {score:.1})"));
            (task, score)
        }
        _ => (TaskType::General, 0.0),
    }
}

fn estimate_complexity(lower: &str, req: &RouteRequest, reasons: &mut Vec<String>) -> Complexity {
    // Aggregate attachment size over 10 MB is decisive.
    if req.attachment_bytes() > EXPERT_ATTACHMENT_BYTES {
        reasons.push("attachments exceed 10 MB, complexity expert".into());
        return Complexity::Expert;
    }

    // Explicit caller hint wins next.
    if let Some(c) = req.hints.complexity {
        reasons.push(format!("complexity hint {c}"));
        return c;
    }

    // Explicit level keywords in the text.
    for (keyword, level) in [
        ("expert", Complexity::Expert),
        ("complex", Complexity::Complex),
        ("moderate", Complexity::Moderate),
        ("simple", Complexity::Simple),
    ] {
        if lower.contains(keyword) {
            reasons.push(format!("level keyword '{keyword}'"));
            return level;
        }
    }

    // Size heuristics.
    let words = lower.split_whitespace().count();
    let sentences = lower
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    let level = if words < 20 {
        Complexity::Simple
    } else if words < 120 {
        Complexity::Moderate
    } else if words < 400 || sentences > 20 {
        Complexity::Complex
    } else {
        Complexity::Expert
    };
    reasons.push(format!("{words} words / {sentences} sentences -> {level}"));
    level
}

/// Token estimation: character base scaled by complexity plus per-attachment
/// estimates by kind.
fn estimate_tokens(content: &str, complexity: Complexity, attachments: &[Attachment]) -> u64 {
    let base = (content.len() as f64 * 0.75) * complexity.token_multiplier();
    let attachment_tokens: f64 = attachments
        .iter()
        .map(|a| {
            let mb = a.size_bytes as f64 / (1024.0 * 1024.0);
            mb * a.kind().tokens_per_mb() as f64
        })
        .sum();
    (base + attachment_tokens).round() as u64
}
