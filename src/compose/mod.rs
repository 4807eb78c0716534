//! Composition engine.
//!
//! Turns a free-text question into one primary recommendation, a ranked set
//! of alternatives, a five-factor confidence breakdown, and a citation trail:
//!
//! ```text
//! create → collect (parallel, per-source timeout) → confidence
//!                                                 → alternatives
//!                                                 → reasoning trace
//!        → result  ⇢  feedback → accuracy ledger
//! ```

mod alternatives;
mod collector;
mod confidence;
mod engine;
mod ledger;
mod trace;
mod types;

pub use alternatives::{AlternativeGenerator, Ranking, FALLBACK_CONFIDENCE};
pub use collector::{CollectedEvidence, EvidenceCollector};
pub use confidence::{
    citation_specificity, evidence_quality, query_complexity, source_agreement,
    temporal_recency, Clock, ConfidenceCalculator, FactorWeights, RECENCY_HALF_LIFE_DAYS,
    SINGLE_SOURCE_AGREEMENT,
};
pub use engine::ComposeEngine;
pub use ledger::{AccuracyLedger, DEFAULT_EMA_ALPHA, LEDGER_BASELINE};
pub use trace::{build_trace, ReasoningTrace};
pub use types::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of question being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Where should this code go?
    Placement,
    /// What breaks if this changes?
    Impact,
    /// Who is this for?
    UserDomain,
    /// Anything else.
    General,
}

impl QueryType {
    /// All query types, in ledger order.
    pub const ALL: [QueryType; 4] = [
        QueryType::Placement,
        QueryType::Impact,
        QueryType::UserDomain,
        QueryType::General,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Placement => "placement",
            QueryType::Impact => "impact",
            QueryType::UserDomain => "user_domain",
            QueryType::General => "general",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            QueryType::Placement => 0,
            QueryType::Impact => 1,
            QueryType::UserDomain => 2,
            QueryType::General => 3,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "placement" => Ok(QueryType::Placement),
            "impact" => Ok(QueryType::Impact),
            "user_domain" | "userdomain" | "domain" => Ok(QueryType::UserDomain),
            "general" => Ok(QueryType::General),
            _ => Err(format!("Unknown query type: {}", s)),
        }
    }
}

/// Evidence-producing collaborator category.
///
/// Variant order is the canonical order used for merging evidence and for
/// reasoning steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Stored memories and past decisions.
    Memory,
    /// Static scan of the project tree.
    Code,
    /// Learned conventions.
    Pattern,
    /// Logical inference.
    Reasoning,
    /// Cross-project best practices and anti-patterns.
    Experience,
}

impl SourceKind {
    /// All source kinds in canonical order.
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Memory,
        SourceKind::Code,
        SourceKind::Pattern,
        SourceKind::Reasoning,
        SourceKind::Experience,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Memory => "memory",
            SourceKind::Code => "code",
            SourceKind::Pattern => "pattern",
            SourceKind::Reasoning => "reasoning",
            SourceKind::Experience => "experience",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(SourceKind::Memory),
            "code" => Ok(SourceKind::Code),
            "pattern" | "patterns" => Ok(SourceKind::Pattern),
            "reasoning" | "inference" => Ok(SourceKind::Reasoning),
            "experience" | "knowledge" => Ok(SourceKind::Experience),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

/// Set of enabled source kinds. Iterates in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSet(BTreeSet<SourceKind>);

impl SourceSet {
    /// Every source kind enabled.
    pub fn all() -> Self {
        Self(SourceKind::ALL.into_iter().collect())
    }

    /// No source enabled.
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, kind: SourceKind) -> Self {
        self.0.insert(kind);
        self
    }

    /// Enable a source kind.
    pub fn insert(&mut self, kind: SourceKind) -> bool {
        self.0.insert(kind)
    }

    /// Disable a source kind.
    pub fn remove(&mut self, kind: SourceKind) -> bool {
        self.0.remove(&kind)
    }

    /// Check whether a kind is enabled.
    pub fn contains(&self, kind: SourceKind) -> bool {
        self.0.contains(&kind)
    }

    /// Number of enabled kinds.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is enabled.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Enabled kinds in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.0.iter().copied()
    }

    /// Parse a comma-separated list such as `memory,code`.
    pub fn parse_list(raw: &str) -> Result<Self, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<SourceKind>)
            .collect()
    }
}

impl Default for SourceSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<SourceKind> for SourceSet {
    fn from_iter<I: IntoIterator<Item = SourceKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|k| k.as_str()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// What the caller did with a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Used as recommended.
    Accepted,
    /// Not used.
    Rejected,
    /// Used with changes.
    Modified,
}

impl Outcome {
    /// Value the accuracy statistic moves toward.
    pub fn target(&self) -> f64 {
        match self {
            Outcome::Accepted => 1.0,
            Outcome::Rejected => 0.0,
            Outcome::Modified => 0.5,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
            Outcome::Modified => "modified",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accepted" | "accept" => Ok(Outcome::Accepted),
            "rejected" | "reject" => Ok(Outcome::Rejected),
            "modified" | "modify" => Ok(Outcome::Modified),
            _ => Err(format!("Unknown outcome: {}", s)),
        }
    }
}

/// Whether evidence argues for or against something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// Evidence in favour of the suggestion.
    #[default]
    Supporting,
    /// Warning evidence (anti-patterns, known risks).
    Cautionary,
}
