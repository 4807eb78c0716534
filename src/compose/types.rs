use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FactorWeights, Outcome, QueryType, SourceKind, SourceSet, Stance};

// ============================================================================
// Evidence
// ============================================================================

/// A single piece of evidence produced by one source adapter call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Source that produced the item.
    pub source: SourceKind,
    /// Human-readable content.
    pub content: String,
    /// Per-item confidence in [0, 1].
    pub confidence: f64,
    /// Human-locatable reference (file:line, memory id, practice id).
    pub citation: String,
    /// When the underlying fact was recorded.
    pub timestamp: DateTime<Utc>,
    /// Supporting or cautionary.
    #[serde(default)]
    pub stance: Stance,
    /// Concrete recommendation this item argues for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl EvidenceItem {
    /// Create a supporting evidence item. Confidence is clamped to [0, 1].
    pub fn new(
        source: SourceKind,
        content: impl Into<String>,
        confidence: f64,
        citation: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            content: content.into(),
            confidence: clamp_unit(confidence),
            citation: citation.into(),
            timestamp,
            stance: Stance::Supporting,
            suggestion: None,
        }
    }

    /// Attach the recommendation this item argues for.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Mark the item as a warning.
    pub fn cautionary(mut self) -> Self {
        self.stance = Stance::Cautionary;
        self
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A source that contributed nothing to a query, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableSource {
    /// The source kind.
    pub source: SourceKind,
    /// Failure, timeout, or missing adapter.
    pub reason: String,
}

// ============================================================================
// Result tree
// ============================================================================

/// Five-factor confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    /// Agreement between per-source confidences.
    pub source_agreement: f64,
    /// Evidence volume and citation specificity.
    pub evidence_quality: f64,
    /// Accuracy ledger value for the query type.
    pub historical_accuracy: f64,
    /// Complexity of the question. Higher lowers the overall score.
    pub query_complexity: f64,
    /// Freshness of the evidence.
    pub temporal_recency: f64,
    /// Normalized weights applied to the factors.
    pub weights: FactorWeights,
    /// Weighted sum, clamped to [0, 1].
    pub overall: f64,
    /// Factor/weight/contribution listing.
    pub explanation: String,
}

/// A competing recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    /// What to do.
    pub description: String,
    /// Arguments in favour.
    pub pros: Vec<String>,
    /// Arguments against.
    pub cons: Vec<String>,
    /// When this option applies.
    pub applicability: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Number of evidence items behind the option.
    pub attribution_count: usize,
}

/// Credit given to one piece of cited evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttribution {
    /// Source kind of the cited evidence.
    pub source: SourceKind,
    /// Citation copied from the evidence item.
    pub citation: String,
    /// Fraction of total credit. All attributions of a result sum to 1.0.
    pub contribution: f64,
    /// Timestamp copied from the evidence item.
    pub timestamp: DateTime<Utc>,
}

/// One step of the citation trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Source kind this step summarizes.
    pub source: SourceKind,
    /// What the source contributed.
    pub description: String,
    /// Cited evidence, never empty.
    pub attributions: Vec<SourceAttribution>,
    /// Mean confidence of the step's evidence.
    pub confidence: f64,
    /// The source kind's share of total evidence confidence.
    pub contribution: f64,
    /// Most recent evidence timestamp in the step.
    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    /// Number of cited evidence items.
    pub fn source_count(&self) -> usize {
        self.attributions.len()
    }
}

/// Everything a successful composition produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionResult {
    /// Primary recommendation. Empty means "no strong single answer".
    pub recommendation: String,
    /// Citation trail in canonical source order.
    pub reasoning: Vec<ReasoningStep>,
    /// Ranked alternatives, never empty.
    pub alternatives: Vec<Alternative>,
    /// Confidence of the primary recommendation.
    pub confidence: ConfidenceBreakdown,
    /// Flattened attributions across all steps.
    pub sources: Vec<SourceAttribution>,
    /// Enabled sources that contributed nothing.
    pub unavailable_sources: Vec<UnavailableSource>,
    /// Number of merged evidence items.
    pub evidence_count: usize,
}

// ============================================================================
// Query
// ============================================================================

/// Per-query thresholds and display flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Enabled evidence sources.
    pub sources: SourceSet,
    /// Maximum number of alternatives returned.
    pub max_results: usize,
    /// Minimum number of alternatives returned.
    pub min_alternatives: usize,
    /// Minimum confidence for a candidate to become the primary recommendation.
    pub min_confidence: f64,
    /// Include the reasoning trail when rendering.
    pub show_reasoning: bool,
    /// Include alternatives when rendering.
    pub show_alternatives: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sources: SourceSet::all(),
            max_results: 3,
            min_alternatives: 1,
            min_confidence: 0.3,
            show_reasoning: true,
            show_alternatives: true,
        }
    }
}

impl QueryOptions {
    /// Restrict the enabled sources.
    pub fn with_sources(mut self, sources: SourceSet) -> Self {
        self.sources = sources;
        self
    }

    /// Set the minimum alternative count.
    pub fn with_min_alternatives(mut self, min_alternatives: usize) -> Self {
        self.min_alternatives = min_alternatives;
        self
    }

    /// Set the maximum alternative count.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Set the primary recommendation threshold.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Alternatives that every successful result carries at least.
    pub fn required_alternatives(&self) -> usize {
        self.min_alternatives.max(1)
    }
}

/// Lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    /// Created, never composed.
    Created,
    /// Pipeline running.
    Composing,
    /// Holds a result.
    Composed,
    /// Last composition failed. May be recomposed.
    Failed,
}

impl QueryState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Created => "created",
            QueryState::Composing => "composing",
            QueryState::Composed => "composed",
            QueryState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A question and, once composed, its result.
///
/// Only [`ComposeEngine`](super::ComposeEngine) creates queries; the result
/// is owned by the query and dropped with it.
#[derive(Debug)]
pub struct Query {
    pub(crate) id: String,
    pub(crate) text: String,
    pub(crate) query_type: QueryType,
    pub(crate) options: QueryOptions,
    pub(crate) state: QueryState,
    pub(crate) result: Option<CompositionResult>,
    pub(crate) created_at: DateTime<Utc>,
    /// Held only by the query. The engine keeps a weak handle, so dropping
    /// the query ends its feedback window.
    pub(crate) liveness: Arc<()>,
}

impl Query {
    /// Process-unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The question.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Query type.
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Thresholds and flags.
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// The attached result, if composed.
    pub fn result(&self) -> Option<&CompositionResult> {
        self.result.as_ref()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// ============================================================================
// Feedback
// ============================================================================

/// Post-hoc signal about a past recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Query the feedback refers to.
    pub query_id: String,
    /// The recommendation that was shown.
    pub recommended: String,
    /// What happened to it.
    pub outcome: Outcome,
    /// What the caller did instead, if anything.
    pub actual_choice: Option<String>,
    /// Free-text reason.
    pub explanation: Option<String>,
    /// Who submitted the feedback.
    pub submitter: Option<String>,
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// Query type. The engine's registered type wins on mismatch.
    pub query_type: QueryType,
}

impl Feedback {
    /// Create feedback for a query.
    pub fn new(query_id: impl Into<String>, query_type: QueryType, outcome: Outcome) -> Self {
        Self {
            query_id: query_id.into(),
            recommended: String::new(),
            outcome,
            actual_choice: None,
            explanation: None,
            submitter: None,
            timestamp: Utc::now(),
            query_type,
        }
    }

    /// Set the recommendation text that was shown.
    pub fn with_recommended(mut self, recommended: impl Into<String>) -> Self {
        self.recommended = recommended.into();
        self
    }

    /// Set what was done instead.
    pub fn with_actual_choice(mut self, actual_choice: impl Into<String>) -> Self {
        self.actual_choice = Some(actual_choice.into());
        self
    }

    /// Set the explanation.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Set the submitter id.
    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }
}
