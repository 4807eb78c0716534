use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{location_anchor, suggest_for, EvidenceSource, SearchFilters};
use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::{ComposeError, ComposeResult, SourceResult};

/// Observations needed before usage stops raising confidence.
const USAGE_SATURATION: f64 = 10.0;
/// Days before a pattern counts as established.
const DAYS_TO_TRUST: f64 = 30.0;
/// Confidence of a freshly learned pattern.
const INITIAL_CONFIDENCE: f64 = 0.5;

/// Prefix of the citation on every PATTERN evidence item; the pattern id follows.
pub const PATTERN_CITATION_PREFIX: &str = "pattern:";

/// Category of a learned convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Naming of functions, variables, files.
    Naming,
    /// File structure and grouping.
    Organization,
    /// Error handling strategy.
    ErrorHandling,
    /// Resource and memory management.
    Memory,
    /// Public API shape.
    ApiDesign,
    /// Test conventions.
    Testing,
    /// Documentation conventions.
    Documentation,
}

impl PatternType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Naming => "naming",
            PatternType::Organization => "organization",
            PatternType::ErrorHandling => "error_handling",
            PatternType::Memory => "memory",
            PatternType::ApiDesign => "api_design",
            PatternType::Testing => "testing",
            PatternType::Documentation => "documentation",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            PatternType::Naming => "naming",
            PatternType::Organization => "org",
            PatternType::ErrorHandling => "error",
            PatternType::Memory => "memory",
            PatternType::ApiDesign => "api",
            PatternType::Testing => "test",
            PatternType::Documentation => "doc",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "naming" => Ok(PatternType::Naming),
            "organization" | "org" => Ok(PatternType::Organization),
            "error_handling" | "error" => Ok(PatternType::ErrorHandling),
            "memory" => Ok(PatternType::Memory),
            "api_design" | "api" => Ok(PatternType::ApiDesign),
            "testing" | "test" => Ok(PatternType::Testing),
            "documentation" | "doc" => Ok(PatternType::Documentation),
            _ => Err(format!("Unknown pattern type: {}", s)),
        }
    }
}

/// Code that follows a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternExample {
    /// `file:line` reference.
    pub location: String,
    /// The code itself.
    pub snippet: String,
    /// When it was found.
    pub discovered: DateTime<Utc>,
}

/// Code that violates a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternException {
    /// `file:line` reference.
    pub location: String,
    /// The violating code.
    pub snippet: String,
    /// Why it deviates.
    pub reason: Option<String>,
    /// Whether the deviation is intentional.
    pub justified: bool,
    /// When it was found.
    pub discovered: DateTime<Utc>,
}

/// A convention learned from the codebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Stable identifier, `pattern_<type>_<n>`.
    pub id: String,
    /// Category.
    pub pattern_type: PatternType,
    /// Short name.
    pub name: String,
    /// What the convention is.
    pub description: String,
    /// Why it exists.
    pub rationale: Option<String>,
    /// Conforming code.
    pub examples: Vec<PatternExample>,
    /// Deviating code.
    pub exceptions: Vec<PatternException>,
    /// Times the pattern was observed.
    pub usage_count: u64,
    /// Times it was recommended.
    pub recommended_count: u64,
    /// Times a recommendation was accepted.
    pub accepted_count: u64,
    /// Current confidence in [0, 1].
    pub confidence: f64,
    /// Incremented on every change.
    pub version: u64,
    /// When the pattern was learned.
    pub created_at: DateTime<Utc>,
    /// Last observation.
    pub last_seen: DateTime<Utc>,
}

impl Pattern {
    /// Examples over all observations; 1.0 before any observation.
    pub fn consistency(&self) -> f64 {
        let total = self.examples.len() + self.exceptions.len();
        if total == 0 {
            1.0
        } else {
            self.examples.len() as f64 / total as f64
        }
    }

    /// Accepted over recommended; 0.5 before any recommendation.
    pub fn recommendation_accuracy(&self) -> f64 {
        if self.recommended_count == 0 {
            0.5
        } else {
            self.accepted_count as f64 / self.recommended_count as f64
        }
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        let usage = (self.usage_count as f64 / USAGE_SATURATION).min(1.0);
        let age_days = ((now - self.created_at).num_seconds() as f64 / 86_400.0).max(0.0);
        let age = (age_days / DAYS_TO_TRUST).min(1.0);
        self.confidence = (0.40 * self.consistency()
            + 0.25 * usage
            + 0.20 * self.recommendation_accuracy()
            + 0.15 * age)
            .clamp(0.0, 1.0);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
        self.version += 1;
        self.recompute(now);
    }
}

/// Input for [`PatternStore::learn`].
#[derive(Debug, Clone, Deserialize)]
pub struct LearnPattern {
    /// Category.
    pub pattern_type: PatternType,
    /// Short name.
    pub name: String,
    /// What the convention is.
    pub description: String,
    /// Why it exists.
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Filter for [`PatternStore::find`].
#[derive(Debug, Clone, Default)]
pub struct PatternQuery {
    /// Restrict to one category.
    pub pattern_type: Option<PatternType>,
    /// Case-insensitive substring of name or description.
    pub keyword: Option<String>,
    /// Lowest confidence to return.
    pub min_confidence: f64,
    /// Result cap; 0 means unlimited.
    pub max_results: usize,
}

#[derive(Debug, Default)]
struct PatternTable {
    patterns: Vec<Pattern>,
    next_id: u64,
}

/// Growable registry of learned conventions.
#[derive(Debug, Default)]
pub struct PatternStore {
    inner: RwLock<PatternTable>,
}

impl PatternStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new convention and return its id.
    pub fn learn(&self, input: LearnPattern) -> ComposeResult<String> {
        if input.name.trim().is_empty() {
            return Err(ComposeError::invalid("name", "pattern name must not be empty"));
        }
        if input.description.trim().is_empty() {
            return Err(ComposeError::invalid(
                "description",
                "pattern description must not be empty",
            ));
        }

        let now = Utc::now();
        let mut table = self.inner.write().unwrap_or_else(|p| p.into_inner());
        table.next_id += 1;
        let id = format!("pattern_{}_{}", input.pattern_type.id_prefix(), table.next_id);

        table.patterns.try_reserve(1)?;
        table.patterns.push(Pattern {
            id: id.clone(),
            pattern_type: input.pattern_type,
            name: input.name.trim().to_string(),
            description: input.description.trim().to_string(),
            rationale: input.rationale.filter(|r| !r.trim().is_empty()),
            examples: Vec::new(),
            exceptions: Vec::new(),
            usage_count: 0,
            recommended_count: 0,
            accepted_count: 0,
            confidence: INITIAL_CONFIDENCE,
            version: 1,
            created_at: now,
            last_seen: now,
        });

        info!(pattern_id = %id, pattern_type = %input.pattern_type, "Learned new pattern");
        Ok(id)
    }

    /// Record conforming code.
    pub fn add_example(&self, pattern_id: &str, location: &str, snippet: &str) -> ComposeResult<()> {
        self.update(pattern_id, |pattern, now| {
            pattern.examples.push(PatternExample {
                location: location.to_string(),
                snippet: snippet.to_string(),
                discovered: now,
            });
            pattern.usage_count += 1;
        })
    }

    /// Record deviating code.
    pub fn add_exception(
        &self,
        pattern_id: &str,
        location: &str,
        snippet: &str,
        reason: Option<&str>,
        justified: bool,
    ) -> ComposeResult<()> {
        self.update(pattern_id, |pattern, now| {
            pattern.exceptions.push(PatternException {
                location: location.to_string(),
                snippet: snippet.to_string(),
                reason: reason.map(str::to_string),
                justified,
                discovered: now,
            });
        })
    }

    /// Record whether a recommendation based on the pattern was accepted.
    pub fn record_outcome(&self, pattern_id: &str, accepted: bool) -> ComposeResult<()> {
        self.update(pattern_id, |pattern, _| {
            pattern.recommended_count += 1;
            if accepted {
                pattern.accepted_count += 1;
            }
        })
    }

    fn update(
        &self,
        pattern_id: &str,
        apply: impl FnOnce(&mut Pattern, DateTime<Utc>),
    ) -> ComposeResult<()> {
        let now = Utc::now();
        let mut table = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let pattern = table
            .patterns
            .iter_mut()
            .find(|p| p.id == pattern_id)
            .ok_or_else(|| {
                ComposeError::invalid("pattern_id", format!("unknown pattern: {}", pattern_id))
            })?;
        apply(pattern, now);
        pattern.touch(now);
        debug!(
            pattern_id,
            confidence = pattern.confidence,
            version = pattern.version,
            "Pattern updated"
        );
        Ok(())
    }

    /// Look up a pattern by id.
    pub fn get(&self, pattern_id: &str) -> Option<Pattern> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .patterns
            .iter()
            .find(|p| p.id == pattern_id)
            .cloned()
    }

    /// Patterns matching a filter, in learning order.
    pub fn find(&self, query: &PatternQuery) -> Vec<Pattern> {
        let keyword = query.keyword.as_ref().map(|k| k.to_lowercase());
        let table = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let matches = table.patterns.iter().filter(|p| {
            query.pattern_type.map_or(true, |t| p.pattern_type == t)
                && p.confidence >= query.min_confidence
                && keyword.as_ref().map_or(true, |k| {
                    p.name.to_lowercase().contains(k.as_str())
                        || p.description.to_lowercase().contains(k.as_str())
                })
        });
        if query.max_results > 0 {
            matches.take(query.max_results).cloned().collect()
        } else {
            matches.cloned().collect()
        }
    }

    /// Every pattern, in learning order.
    pub fn all(&self) -> Vec<Pattern> {
        self.find(&PatternQuery::default())
    }

    /// Number of learned patterns.
    pub fn count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .patterns
            .len()
    }
}

/// Evidence from learned conventions.
pub struct PatternSource {
    store: std::sync::Arc<PatternStore>,
}

impl PatternSource {
    /// Wrap a pattern store.
    pub fn new(store: std::sync::Arc<PatternStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EvidenceSource for PatternSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Pattern
    }

    async fn search(
        &self,
        _query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>> {
        let mut matched: Vec<Pattern> = self
            .store
            .all()
            .into_iter()
            .filter(|p| {
                let haystack = format!(
                    "{} {} {} {}",
                    p.name,
                    p.description,
                    p.rationale.as_deref().unwrap_or_default(),
                    p.pattern_type
                );
                filters.match_fraction(&haystack) > 0.0
            })
            .collect();
        matched.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.id.cmp(&b.id))
        });
        matched.truncate(filters.max_items);

        Ok(matched
            .into_iter()
            .map(|p| {
                let mut content = format!("{}: {}", p.name, p.description);
                if let Some(rationale) = &p.rationale {
                    content.push_str(&format!(" ({})", rationale));
                }
                let anchor = p
                    .examples
                    .first()
                    .and_then(|e| location_anchor(&e.location));
                let item = EvidenceItem::new(
                    SourceKind::Pattern,
                    content,
                    p.confidence,
                    format!("{}{}", PATTERN_CITATION_PREFIX, p.id),
                    p.last_seen,
                );
                match anchor {
                    Some(anchor) => item.with_suggestion(suggest_for(query_type, &anchor)),
                    None => item,
                }
            })
            .collect())
    }
}
