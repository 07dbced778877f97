use serde::{Deserialize, Serialize};

/// Subject-matter domain inferred for a request.
///
/// Serialized lowercase to match the ingress wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Technical,
    Financial,
    Legal,
    Healthcare,
    Creative,
    Research,
    Education,
    General,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Domain::Technical => "technical",
            Domain::Financial => "financial",
            Domain::Legal => "legal",
            Domain::Healthcare => "healthcare",
            Domain::Creative => "creative",
            Domain::Research => "research",
            Domain::Education => "education",
            Domain::General => "general",
        };
        write!(f, "{s}")
    }
}

/// Task category driving the routing-table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    ComplexReasoning,
    StrategicPlanning,
    ResearchAnalysis,
    RagOperations,
    CodeGeneration,
    CreativeGeneration,
    FastResponse,
    CostSensitive,
    Multimodal,
    BusinessIntelligence,
    DocumentProcessing,
    TechnicalDocs,
    General,
}

impl TaskType {
    /// Stable wire identifier, also used as the routing-table key.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ComplexReasoning => "complex-reasoning",
            TaskType::StrategicPlanning => "strategic-planning",
            TaskType::ResearchAnalysis => "research-analysis",
            TaskType::RagOperations => "rag-operations",
            TaskType::CodeGeneration => "code-generation",
            TaskType::CreativeGeneration => "creative-generation",
            TaskType::FastResponse => "fast-response",
            TaskType::CostSensitive => "cost-sensitive",
            TaskType::Multimodal => "multimodal",
            TaskType::BusinessIntelligence => "business-intelligence",
            TaskType::DocumentProcessing => "document-processing",
            TaskType::TechnicalDocs => "technical-docs",
            TaskType::General => "general",
        }
    }

    /// Parse a routing-table key or `useCase` hint.
    pub fn parse(s: &str) -> Option<TaskType> {
        let t = match s.trim().to_ascii_lowercase().as_str() {
            "complex-reasoning" | "reasoning" => TaskType::ComplexReasoning,
            "strategic-planning" | "planning" => TaskType::StrategicPlanning,
            "research-analysis" => TaskType::ResearchAnalysis,
            "rag-operations" | "rag" => TaskType::RagOperations,
            "code-generation" | "code" | "coding" => TaskType::CodeGeneration,
            "creative-generation" | "creative" => TaskType::CreativeGeneration,
            "fast-response" | "fast" => TaskType::FastResponse,
            "cost-sensitive" | "cheap" => TaskType::CostSensitive,
            "multimodal" => TaskType::Multimodal,
            "business-intelligence" => TaskType::BusinessIntelligence,
            "document-processing" | "documents" => TaskType::DocumentProcessing,
            "technical-docs" => TaskType::TechnicalDocs,
            "general" => TaskType::General,
            _ => return None,
        };
        Some(t)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Estimated difficulty of fulfilling a request.
///
/// Ordering is meaningful: `Simple < Moderate < Complex < Expert`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
    Expert,
}

impl Complexity {
    /// Token-estimate multiplier for this level.
    pub fn token_multiplier(&self) -> f64 {
        match self {
            Complexity::Simple => 1.0,
            Complexity::Moderate => 1.5,
            Complexity::Complex => 2.5,
            Complexity::Expert => 4.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Option<Complexity> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Complexity::Simple),
            "moderate" => Some(Complexity::Moderate),
            "complex" => Some(Complexity::Complex),
            "expert" => Some(Complexity::Expert),
            _ => None,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scheduling priority attached to a request or cache entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Eviction-score rank: lower priority evicts first.
    pub fn rank(&self) -> f64 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 2.0,
            Priority::Medium => 3.0,
            Priority::Low => 4.0,
        }
    }

    /// Map the numeric ingress hint (1..=4) onto a priority level.
    pub fn from_hint(n: u8) -> Priority {
        match n {
            0 | 1 => Priority::Low,
            2 => Priority::Medium,
            3 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

/// Structured inference about a request, produced by the classifier and
/// consumed by the routing policy and cache keying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub domain: Domain,
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub priority: Priority,
    pub requires_multimodal: bool,
    pub requires_rag: bool,
    pub requires_code_generation: bool,
    /// Rough token estimate for the full exchange (input + expected output).
    pub estimated_tokens: u64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Free-form explanation of how the classification was reached.
    pub reasoning: String,
}

impl Classification {
    /// The neutral classification used when every tier fails.
    pub fn fallback() -> Self {
        Self {
            domain: Domain::General,
            task_type: TaskType::General,
            complexity: Complexity::Moderate,
            priority: Priority::Medium,
            requires_multimodal: false,
            requires_rag: false,
            requires_code_generation: false,
            estimated_tokens: 0,
            confidence: 0.3,
            reasoning: "fallback: no tier produced a confident classification".to_string(),
        }
    }
}
