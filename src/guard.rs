//! Prompt-injection defence and response safety validation.
//!
//! Two-phase evaluation over the request payload:
//! 1. **Pattern packs**: regex families with a base severity (instruction
//!    override, role manipulation, context manipulation, system-prompt
//!    extraction, jailbreak, encoding/obfuscation, script/SQL/command
//!    injection). Packs are data; the control flow never enumerates them.
//! 2. **Character analysis**: non-alphanumeric ratio, control characters,
//!    zero-width and combining-mark clusters.
//!
//! Severities aggregate to a risk level; `High` and above blocks. The guard
//! fails closed: an internal error produces a blocking verdict.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Risk level for a request or response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A single detected anomaly.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Anomaly {
    /// Pattern family (or analysis stage) that produced the finding.
    pub family: String,
    pub description: String,
    pub severity: RiskLevel,
}

/// Verdict for one inspection pass.
#[derive(Debug, Clone)]
pub struct GuardVerdict {
    pub is_safe: bool,
    pub risk_level: RiskLevel,
    pub anomalies: Vec<Anomaly>,
    /// Control characters stripped, whitespace normalized. Used downstream
    /// in place of the raw payload.
    pub sanitized_content: String,
    pub blocked: bool,
}

impl GuardVerdict {
    /// Description of the first (most significant) anomaly, for error bodies.
    pub fn first_anomaly(&self) -> String {
        self.anomalies
            .first()
            .map(|a| a.description.clone())
            .unwrap_or_else(|| "request failed safety inspection".to_string())
    }
}

/// Caller-scoped rate limiting, injected by the deployment.
pub trait RateLimiter: Send + Sync {
    /// Returns seconds to wait, or `None` when the caller may proceed.
    fn check(&self, caller: &str) -> Option<u64>;
}

/// Permits everything. Used when no limiter is configured.
pub struct NoLimiter;

impl RateLimiter for NoLimiter {
    fn check(&self, _caller: &str) -> Option<u64> {
        None
    }
}

struct InjectionPattern {
    regex: &'static Lazy<Regex>,
    description: &'static str,
}

/// A family of related injection patterns with a base severity.
struct Pack {
    family: &'static str,
    severity: RiskLevel,
    patterns: &'static [InjectionPattern],
}

macro_rules! lazy_re {
    ($pat:expr) => {{
        static RE: Lazy<Regex> = Lazy::new(|| Regex::new($pat).unwrap());
        &RE
    }};
}

static REQUEST_PACKS: &[Pack] = &[
    Pack {
        family: "instruction-override",
        severity: RiskLevel::High,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\b(ignore|disregard|forget)\s+(all\s+|any\s+)?(previous|prior|above|earlier|the)\s+(instructions|prompts|directives|rules|context)"
                ),
                description: "attempts to override prior instructions",
            },
            InjectionPattern {
                regex: lazy_re!(r"(?i)\bnew\s+instructions?\s*:"),
                description: "injects replacement instructions",
            },
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\bdo\s+not\s+follow\s+(your|the)\s+(instructions|guidelines|rules)"
                ),
                description: "asks the model to abandon its guidelines",
            },
        ],
    },
    Pack {
        family: "role-manipulation",
        severity: RiskLevel::High,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(r"(?i)\byou\s+are\s+(now|no\s+longer)\b"),
                description: "attempts to reassign the assistant role",
            },
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\b(act|behave)\s+as\s+(if\s+you\s+(were|are)\s+)?(an?\s+)?(unrestricted|unfiltered|uncensored)"
                ),
                description: "requests an unrestricted persona",
            },
            InjectionPattern {
                regex: lazy_re!(r"(?i)\bpretend\s+(to\s+be|you\s+are|you\s+have\s+no)\b"),
                description: "persona substitution request",
            },
        ],
    },
    Pack {
        family: "context-manipulation",
        severity: RiskLevel::Medium,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\bthe\s+(real|actual|true)\s+(task|instructions?|prompt)\s+(is|are)\b"
                ),
                description: "asserts a hidden 'real' task",
            },
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\beverything\s+(above|before)\s+(is|was)\s+(fake|false|a\s+test)"
                ),
                description: "declares prior context fake",
            },
        ],
    },
    Pack {
        family: "system-prompt-extraction",
        severity: RiskLevel::High,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\b(reveal|show|print|repeat|output|display)\b.{0,40}\b(system\s+prompt|initial\s+instructions|hidden\s+instructions)"
                ),
                description: "requests disclosure of the system prompt",
            },
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\bwhat\s+(is|are)\s+your\s+(system\s+prompt|instructions|rules)\b"
                ),
                description: "probes for configured instructions",
            },
        ],
    },
    Pack {
        family: "jailbreak",
        severity: RiskLevel::Critical,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(r"(?i)\b(jailbreak|jail\s*broken|dan\s+mode|developer\s+mode)\b"),
                description: "named jailbreak technique",
            },
            InjectionPattern {
                regex: lazy_re!(r"(?i)\bdo\s+anything\s+now\b"),
                description: "named jailbreak technique",
            },
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\bwithout\s+(any\s+)?(restrictions|limitations|filters|safety)"
                ),
                description: "requests removal of safety limits",
            },
        ],
    },
    Pack {
        family: "encoding-obfuscation",
        severity: RiskLevel::Medium,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(r"[A-Za-z0-9+/]{80,}={0,2}"),
                description: "long base64-like run",
            },
            InjectionPattern {
                regex: lazy_re!(r"(?i)\bdecode\s+(the\s+following|this)\b"),
                description: "asks for decoding of obfuscated content",
            },
            InjectionPattern {
                regex: lazy_re!(r"(\\x[0-9a-fA-F]{2}){6,}"),
                description: "hex-escaped byte run",
            },
        ],
    },
    Pack {
        family: "script-injection",
        severity: RiskLevel::High,
        patterns: &[InjectionPattern {
            regex: lazy_re!(r"(?i)<\s*script\b|javascript\s*:|\bonerror\s*="),
            description: "embedded script content",
        }],
    },
    Pack {
        family: "sql-injection",
        severity: RiskLevel::High,
        patterns: &[InjectionPattern {
            regex: lazy_re!(
                r"(?i)\b(union\s+select|drop\s+table|truncate\s+table)\b|;\s*delete\s+from\b"
            ),
            description: "SQL injection fragment",
        }],
    },
    Pack {
        family: "command-injection",
        severity: RiskLevel::High,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(r"[;&|]\s*(rm|curl|wget|nc|bash|sh|chmod)\s+-"),
                description: "shell command chain",
            },
            InjectionPattern {
                regex: lazy_re!(r"\$\([^)]{1,80}\)|`[^`]{1,80}`"),
                description: "command substitution",
            },
        ],
    },
];

static RESPONSE_PACKS: &[Pack] = &[
    Pack {
        family: "system-revelation",
        severity: RiskLevel::Critical,
        patterns: &[
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\bmy\s+(system\s+prompt|initial\s+instructions)\s+(is|are|says)\b"
                ),
                description: "response reveals system instructions",
            },
            InjectionPattern {
                regex: lazy_re!(
                    r"(?i)\bhere\s+(is|are)\s+(my|the)\s+(system\s+prompt|hidden\s+instructions)"
                ),
                description: "response reveals system instructions",
            },
        ],
    },
    Pack {
        family: "rule-bypass",
        severity: RiskLevel::Critical,
        patterns: &[InjectionPattern {
            regex: lazy_re!(
                r"(?i)\bi\s+(will|can|have)\s+(now\s+)?(ignore|ignored|bypass|bypassed)\s+(my|the)\s+(guidelines|rules|restrictions|safety)"
            ),
            description: "response claims to bypass safety rules",
        }],
    },
    Pack {
        family: "role-takeover",
        severity: RiskLevel::High,
        patterns: &[InjectionPattern {
            regex: lazy_re!(r"(?i)\bi\s+am\s+(now\s+)?(dan|an?\s+unrestricted|an?\s+unfiltered)\b"),
            description: "response asserts a takeover persona",
        }],
    },
];

/// Pairs of instructions whose co-occurrence indicates a contradiction attack.
static CONTRADICTIONS: &[(&str, &str, &str)] = &[
    (
        "ignore the instructions",
        "follow the instructions",
        "conflicting ignore/follow instructions",
    ),
    (
        "you are an assistant",
        "you are not an assistant",
        "conflicting self-role assertions",
    ),
    (
        "this is real",
        "this is fake",
        "conflicting real/fake context markers",
    ),
];

/// Configuration for the guard.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub max_prompt_len: usize,
    /// Verdicts at or above this level are blocked.
    pub block_level: RiskLevel,
    /// Ratio of non-alphanumeric characters above which a medium anomaly
    /// is raised.
    pub symbol_ratio_threshold: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_prompt_len: 100_000,
            block_level: RiskLevel::High,
            symbol_ratio_threshold: 0.5,
        }
    }
}

/// Request/response safety inspector.
pub struct Guard {
    config: GuardConfig,
    limiter: Arc<dyn RateLimiter>,
}

impl Guard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            limiter: Arc::new(NoLimiter),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Rate-limit check for a caller. Returns seconds to wait when limited.
    pub fn check_rate(&self, caller: &str) -> Option<u64> {
        self.limiter.check(caller)
    }

    /// Inspect an inbound payload before any upstream work.
    pub fn inspect_request(&self, content: &str) -> GuardVerdict {
        // catch_unwind keeps the fail-closed promise even if a pattern or
        // analysis step panics on pathological input.
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.inspect_with_packs(content, REQUEST_PACKS, true)
        })) {
            Ok(verdict) => verdict,
            Err(_) => {
                tracing::error!("guard inspection panicked; failing closed");
                GuardVerdict {
                    is_safe: false,
                    risk_level: RiskLevel::Critical,
                    anomalies: vec![Anomaly {
                        family: "guard-internal".into(),
                        description: "safety inspection failed".into(),
                        severity: RiskLevel::Critical,
                    }],
                    sanitized_content: String::new(),
                    blocked: true,
                }
            }
        }
    }

    /// Inspect an upstream response. A critical verdict is treated by the
    /// pipeline as an execution failure.
    pub fn inspect_response(&self, content: &str) -> GuardVerdict {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.inspect_with_packs(content, RESPONSE_PACKS, false)
        })) {
            Ok(verdict) => verdict,
            Err(_) => {
                tracing::error!("guard response inspection panicked; failing closed");
                GuardVerdict {
                    is_safe: false,
                    risk_level: RiskLevel::Critical,
                    anomalies: Vec::new(),
                    sanitized_content: String::new(),
                    blocked: true,
                }
            }
        }
    }

    fn inspect_with_packs(
        &self,
        content: &str,
        packs: &[Pack],
        full_analysis: bool,
    ) -> GuardVerdict {
        let mut anomalies = Vec::new();

        if full_analysis && content.len() > self.config.max_prompt_len {
            anomalies.push(Anomaly {
                family: "length".into(),
                description: format!(
                    "prompt length {} exceeds maximum {}",
                    content.len(),
                    self.config.max_prompt_len
                ),
                severity: RiskLevel::High,
            });
        }

        for pack in packs {
            for pattern in pack.patterns {
                if pattern.regex.is_match(content) {
                    anomalies.push(Anomaly {
                        family: pack.family.to_string(),
                        description: pattern.description.to_string(),
                        severity: pack.severity,
                    });
                    // One finding per family is enough to set its severity.
                    break;
                }
            }
        }

        if full_analysis {
            self.analyze_characters(content, &mut anomalies);
            self.analyze_contradictions(content, &mut anomalies);
        }

        let risk_level = aggregate_risk(&anomalies);
        let blocked = risk_level >= self.config.block_level;
        GuardVerdict {
            is_safe: !blocked && anomalies.is_empty(),
            risk_level,
            sanitized_content: sanitize(content),
            blocked,
            anomalies,
        }
    }

    fn analyze_characters(&self, content: &str, anomalies: &mut Vec<Anomaly>) {
        if content.is_empty() {
            return;
        }

        let total = content.chars().count();
        let mut symbols = 0usize;
        let mut controls = 0usize;
        let mut zero_width = 0usize;
        let mut combining = 0usize;
        let mut combining_run = 0usize;
        let mut max_combining_run = 0usize;

        for c in content.chars() {
            if c.is_control() && c != '\n' && c != '\t' && c != '\r' {
                controls += 1;
            }
            if matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}') {
                zero_width += 1;
            }
            if ('\u{0300}'..='\u{036F}').contains(&c) {
                combining += 1;
                combining_run += 1;
                max_combining_run = max_combining_run.max(combining_run);
            } else {
                combining_run = 0;
            }
            if !c.is_alphanumeric() && !c.is_whitespace() {
                symbols += 1;
            }
        }

        if controls > 0 {
            anomalies.push(Anomaly {
                family: "control-characters".into(),
                description: format!("{controls} control characters present"),
                severity: RiskLevel::Critical,
            });
        }
        if zero_width > 0 {
            anomalies.push(Anomaly {
                family: "zero-width".into(),
                description: format!("{zero_width} zero-width characters present"),
                severity: RiskLevel::High,
            });
        }
        if max_combining_run >= 4 {
            anomalies.push(Anomaly {
                family: "combining-marks".into(),
                description: format!("combining-mark cluster of length {max_combining_run}"),
                severity: RiskLevel::High,
            });
        } else if combining > total / 4 && combining > 8 {
            anomalies.push(Anomaly {
                family: "combining-marks".into(),
                description: "unusually dense combining marks".into(),
                severity: RiskLevel::High,
            });
        }
        let ratio = symbols as f64 / total as f64;
        if ratio > self.config.symbol_ratio_threshold && total > 20 {
            anomalies.push(Anomaly {
                family: "symbol-ratio".into(),
                description: format!("non-alphanumeric ratio {ratio:.2} above threshold"),
                severity: RiskLevel::Medium,
            });
        }
    }

    fn analyze_contradictions(&self, content: &str, anomalies: &mut Vec<Anomaly>) {
        let lower = content.to_lowercase();
        for (a, b, description) in CONTRADICTIONS {
            if lower.contains(a) && lower.contains(b) {
                anomalies.push(Anomaly {
                    family: "semantic-contradiction".into(),
                    description: (*description).to_string(),
                    severity: RiskLevel::Medium,
                });
            }
        }
    }
}

/// Aggregate anomaly severities into one risk level.
///
/// The level is the maximum severity; three or more medium-plus findings
/// escalate one step.
fn aggregate_risk(anomalies: &[Anomaly]) -> RiskLevel {
    let mut level = anomalies
        .iter()
        .map(|a| a.severity)
        .max()
        .unwrap_or(RiskLevel::Low);
    let significant = anomalies
        .iter()
        .filter(|a| a.severity >= RiskLevel::Medium)
        .count();
    if significant >= 3 {
        level = match level {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            _ => RiskLevel::Critical,
        };
    }
    level
}

/// Strip control and zero-width characters, normalize whitespace runs.
pub fn sanitize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last_space = false;
    for c in content.chars() {
        if c.is_control() && c != '\n' {
            continue;
        }
        if matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}') {
            continue;
        }
        if c == ' ' || c == '\t' {
            if last_space {
                continue;
            }
            out.push(' ');
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().to_string()
}
