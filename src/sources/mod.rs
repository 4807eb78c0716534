//! Evidence source adapters.
//!
//! Each adapter wraps one external collaborator behind [`EvidenceSource`]:
//!
//! - [`MemorySource`]: keyword search over stored memory records
//! - [`CodeSource`]: bounded static scan of the project tree, plus the
//!   dependency graph of an [`ImpactStore`] for impact questions
//! - [`PatternSource`]: learned conventions from a [`PatternStore`]
//! - [`ReasoningSource`]: rule-based inference, optionally backed by a Langbase pipe
//! - [`ExperienceSource`]: cross-project practices and anti-patterns
//!
//! Adapters return an empty vector for "no results" and an error only on
//! genuine failure.

mod breaker;
mod code;
mod experience;
mod impact;
mod inference;
mod memory;
mod pattern;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use code::CodeSource;
pub use experience::ExperienceSource;
pub use impact::{
    ChangeRecord, Dependency, DependencyType, ImpactPrediction, ImpactSeverity, ImpactStore,
    RecordChange, DEPENDENCY_CITATION_PREFIX,
};
pub use inference::{find_analogy, Analogy, InferenceChain, InferenceRule, ReasoningSource};
pub use memory::MemorySource;
pub use pattern::{
    LearnPattern, Pattern, PatternExample, PatternException, PatternQuery, PatternSource,
    PatternStore, PatternType, PATTERN_CITATION_PREFIX,
};

use async_trait::async_trait;

use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::SourceResult;

/// Narrowing applied to every source call of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilters {
    /// Maximum items an adapter should return.
    pub max_items: usize,
    /// Lowercased content words of the question.
    pub keywords: Vec<String>,
}

impl SearchFilters {
    /// Build filters for a question.
    pub fn for_query(query_text: &str, max_items: usize) -> Self {
        Self {
            max_items,
            keywords: keywords(query_text),
        }
    }

    /// Fraction of keywords found in `haystack` (case-insensitive).
    pub fn match_fraction(&self, haystack: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let haystack = haystack.to_lowercase();
        let hits = self
            .keywords
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .count();
        hits as f64 / self.keywords.len() as f64
    }
}

/// Uniform interface over an evidence-producing collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Which source kind this adapter serves.
    fn kind(&self) -> SourceKind;

    /// Search for evidence relevant to a question.
    async fn search(
        &self,
        query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>>;
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "what", "where", "when", "which", "who",
    "whom", "why", "how", "should", "would", "could", "will", "can", "does", "did", "are",
    "was", "were", "has", "have", "had", "into", "from", "about", "there", "their", "then",
    "than", "them", "they", "our", "your", "you", "its", "not", "but", "any", "all", "put",
    "goes", "going", "place", "happen", "happens", "change", "changes", "break", "breaks",
    "use", "used", "using", "i'm", "new", "some", "get", "got", "want", "need",
];

/// Lowercased content words of a question, deduplicated, in order.
pub fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\'')) {
        let word = raw.trim_matches('\'').to_lowercase();
        if word.len() < 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

/// Location a citation points at, without line number and file name.
///
/// `src/util/log.rs:12` and `src/util/log.rs` both anchor at `src/util`;
/// a bare directory anchors at itself.
pub fn location_anchor(citation: &str) -> Option<String> {
    let mut path = citation.trim();
    if let Some((head, line)) = path.rsplit_once(':') {
        if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
            path = head;
        }
    }
    let path = path.trim_end_matches('/');
    if path.is_empty() || path.contains(char::is_whitespace) {
        return None;
    }

    let (dir, last) = match path.rsplit_once('/') {
        Some((dir, last)) => (dir, last),
        None => ("", path),
    };
    if last.contains('.') {
        if dir.is_empty() {
            Some(".".to_string())
        } else {
            Some(dir.to_string())
        }
    } else {
        Some(path.to_string())
    }
}

/// Recommendation text for a location, phrased for the query type.
pub fn suggest_for(query_type: QueryType, anchor: &str) -> String {
    match query_type {
        QueryType::Placement => format!("Place it in {}", anchor),
        QueryType::Impact => format!("Review dependents of {}", anchor),
        QueryType::UserDomain => format!("Target the audience served by {}", anchor),
        QueryType::General => format!("Follow the approach used in {}", anchor),
    }
}
