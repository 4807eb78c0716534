use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{suggest_for, SearchFilters};
use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::{ComposeError, ComposeResult};

/// Affected items at which the breadth term of the risk saturates.
const DEPENDENCY_SCALE: f64 = 10.0;
/// Files plus functions touched at which a change counts as full impact.
const CHANGE_SCALE: f64 = 20.0;
/// Failure rate assumed before any change is recorded.
const UNKNOWN_FAILURE_RATE: f64 = 0.5;
/// Prediction confidence before any change is recorded.
const BASE_CONFIDENCE: f64 = 0.5;

/// Prefix of the citation on every dependency evidence item.
pub const DEPENDENCY_CITATION_PREFIX: &str = "dependency:";

/// How one component relies on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Calls a function of the target.
    FunctionCall,
    /// Reads or writes the target's data.
    DataAccess,
    /// Includes or imports the target.
    Include,
    /// Names a symbol the target defines.
    SymbolReference,
    /// Reaches the target through something else.
    Indirect,
}

impl DependencyType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::FunctionCall => "function_call",
            DependencyType::DataAccess => "data_access",
            DependencyType::Include => "include",
            DependencyType::SymbolReference => "symbol_reference",
            DependencyType::Indirect => "indirect",
        }
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "function_call" | "call" => Ok(DependencyType::FunctionCall),
            "data_access" | "data" => Ok(DependencyType::DataAccess),
            "include" | "import" => Ok(DependencyType::Include),
            "symbol_reference" | "symbol" => Ok(DependencyType::SymbolReference),
            "indirect" => Ok(DependencyType::Indirect),
            _ => Err(format!("Unknown dependency type: {}", s)),
        }
    }
}

/// `source` depends on `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// The dependent component.
    pub source: String,
    /// The component depended on.
    pub target: String,
    /// Kind of reliance.
    pub dependency_type: DependencyType,
    /// Coupling strength in [0, 1].
    pub strength: f64,
    /// When the edge was recorded or last updated.
    pub discovered: DateTime<Utc>,
}

impl Dependency {
    /// `dependency:<source>-><target>`.
    pub fn citation(&self) -> String {
        format!("{}{}->{}", DEPENDENCY_CITATION_PREFIX, self.source, self.target)
    }
}

/// Bucketed count of affected items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    /// Nothing depends on the target.
    None,
    /// One or two dependents.
    Low,
    /// Up to five dependents.
    Medium,
    /// Up to ten dependents.
    High,
    /// More than ten dependents.
    Critical,
}

impl ImpactSeverity {
    /// 0 none, up to 2 low, up to 5 medium, up to 10 high, beyond that critical.
    pub fn from_affected(count: usize) -> Self {
        match count {
            0 => ImpactSeverity::None,
            1..=2 => ImpactSeverity::Low,
            3..=5 => ImpactSeverity::Medium,
            6..=10 => ImpactSeverity::High,
            _ => ImpactSeverity::Critical,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactSeverity::None => "none",
            ImpactSeverity::Low => "low",
            ImpactSeverity::Medium => "medium",
            ImpactSeverity::High => "high",
            ImpactSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ImpactSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a change to one target is expected to disturb.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactPrediction {
    /// The component being changed.
    pub target: String,
    /// Direct dependents of the target, strongest first.
    pub affected: Vec<Dependency>,
    /// Bucketed size of `affected`.
    pub severity: ImpactSeverity,
    /// Breadth and historical failure rate combined, in [0, 1].
    pub risk: f64,
    /// Grows with the historical success rate.
    pub confidence: f64,
    /// One-line summary.
    pub explanation: String,
}

/// Input for [`ImpactStore::record_change`].
#[derive(Debug, Clone, Deserialize)]
pub struct RecordChange {
    /// What was changed.
    pub description: String,
    /// Files the change touched.
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Functions the change touched.
    #[serde(default)]
    pub functions_affected: Vec<String>,
    /// Whether the change landed without problems.
    pub successful: bool,
    /// What went wrong, if anything.
    #[serde(default)]
    pub issues: Option<String>,
}

/// A past change and how it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// `change_<n>`.
    pub id: String,
    /// What was changed.
    pub description: String,
    /// Files the change touched.
    pub files_changed: Vec<String>,
    /// Functions the change touched.
    pub functions_affected: Vec<String>,
    /// Whether the change landed without problems.
    pub successful: bool,
    /// What went wrong, if anything.
    pub issues: Option<String>,
    /// Size of the change in [0, 1], halved when it succeeded.
    pub actual_impact: f64,
    /// When the change was logged.
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ImpactTable {
    dependencies: Vec<Dependency>,
    changes: Vec<ChangeRecord>,
    next_change_id: u64,
}

impl ImpactTable {
    fn failure_rate(&self) -> f64 {
        if self.changes.is_empty() {
            return UNKNOWN_FAILURE_RATE;
        }
        let failed = self.changes.iter().filter(|c| !c.successful).count();
        failed as f64 / self.changes.len() as f64
    }
}

/// Dependency graph and change history behind impact predictions.
#[derive(Debug, Default)]
pub struct ImpactStore {
    inner: RwLock<ImpactTable>,
}

impl ImpactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source` depends on `target`.
    ///
    /// Re-adding an existing edge of the same type updates its strength.
    pub fn add_dependency(
        &self,
        source: &str,
        target: &str,
        dependency_type: DependencyType,
        strength: f64,
    ) -> ComposeResult<()> {
        let source = source.trim();
        let target = target.trim();
        if source.is_empty() {
            return Err(ComposeError::invalid("source", "dependency source must not be empty"));
        }
        if target.is_empty() {
            return Err(ComposeError::invalid("target", "dependency target must not be empty"));
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(ComposeError::invalid(
                "strength",
                format!("{} is outside [0, 1]", strength),
            ));
        }

        let now = Utc::now();
        let mut table = self.inner.write().unwrap_or_else(|p| p.into_inner());
        match table.dependencies.iter_mut().find(|d| {
            d.source == source && d.target == target && d.dependency_type == dependency_type
        }) {
            Some(existing) => {
                existing.strength = strength;
                existing.discovered = now;
                debug!(source, target, strength, "Dependency updated");
            }
            None => {
                table.dependencies.try_reserve(1)?;
                table.dependencies.push(Dependency {
                    source: source.to_string(),
                    target: target.to_string(),
                    dependency_type,
                    strength,
                    discovered: now,
                });
                info!(source, target, dependency_type = %dependency_type, "Dependency recorded");
            }
        }
        Ok(())
    }

    /// Direct dependents of `target`, strongest first.
    pub fn dependents_of(&self, target: &str) -> Vec<Dependency> {
        let table = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut found: Vec<Dependency> = table
            .dependencies
            .iter()
            .filter(|d| d.target == target)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.source.cmp(&b.source))
        });
        found
    }

    /// Distinct dependency targets in first-recorded order.
    pub fn targets(&self) -> Vec<String> {
        let table = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut targets: Vec<String> = Vec::new();
        for dependency in &table.dependencies {
            if !targets.contains(&dependency.target) {
                targets.push(dependency.target.clone());
            }
        }
        targets
    }

    /// Number of recorded edges.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .dependencies
            .len()
    }

    /// Log a completed change and return its id.
    pub fn record_change(&self, input: RecordChange) -> ComposeResult<String> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(ComposeError::invalid(
                "description",
                "change description must not be empty",
            ));
        }

        let touched = (input.files_changed.len() + input.functions_affected.len()) as f64;
        let mut actual_impact = (touched / CHANGE_SCALE).min(1.0);
        if input.successful {
            actual_impact *= 0.5;
        }

        let mut table = self.inner.write().unwrap_or_else(|p| p.into_inner());
        table.changes.try_reserve(1)?;
        table.next_change_id += 1;
        let id = format!("change_{}", table.next_change_id);
        table.changes.push(ChangeRecord {
            id: id.clone(),
            description: description.to_string(),
            files_changed: input.files_changed,
            functions_affected: input.functions_affected,
            successful: input.successful,
            issues: input.issues.filter(|i| !i.trim().is_empty()),
            actual_impact,
            recorded_at: Utc::now(),
        });

        info!(
            change_id = %id,
            successful = input.successful,
            actual_impact,
            "Change recorded"
        );
        Ok(id)
    }

    /// Recorded changes, oldest first.
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .changes
            .clone()
    }

    /// Predict what changing `target` disturbs.
    pub fn predict(&self, target: &str) -> ImpactPrediction {
        let affected = self.dependents_of(target);
        let table = self.inner.read().unwrap_or_else(|p| p.into_inner());

        let history = table.changes.len();
        let failure_rate = table.failure_rate();
        let breadth = (affected.len() as f64 / DEPENDENCY_SCALE).min(1.0);
        let risk = (breadth * 0.6 + failure_rate * 0.4).clamp(0.0, 1.0);
        let confidence = if history == 0 {
            BASE_CONFIDENCE
        } else {
            (BASE_CONFIDENCE + 0.3 * (1.0 - failure_rate)).clamp(0.0, 1.0)
        };

        let severity = ImpactSeverity::from_affected(affected.len());
        let explanation = format!(
            "Predicted impact: {} ({} affected items). Risk score: {}%. Based on {} historical changes.",
            severity,
            affected.len(),
            (risk * 100.0).round() as u32,
            history
        );

        ImpactPrediction {
            target: target.to_string(),
            affected,
            severity,
            risk,
            confidence,
            explanation,
        }
    }

    /// Dependency evidence for every target the question names.
    ///
    /// A target matches when the question mentions it or it contains a
    /// question keyword. Each dependent becomes one item citing its edge.
    pub fn evidence(&self, query_text: &str, filters: &SearchFilters) -> Vec<EvidenceItem> {
        let lower_query = query_text.to_lowercase();
        let mut items = Vec::new();

        for target in self.targets() {
            let lower_target = target.to_lowercase();
            let named = lower_query.contains(&lower_target)
                || filters
                    .keywords
                    .iter()
                    .any(|k| lower_target.contains(k.as_str()));
            if !named {
                continue;
            }

            let prediction = self.predict(&target);
            let suggestion = suggest_for(QueryType::Impact, &target);
            for dependency in &prediction.affected {
                let content = format!(
                    "{} depends on {} via {} (strength {:.2}). {}",
                    dependency.source,
                    dependency.target,
                    dependency.dependency_type,
                    dependency.strength,
                    prediction.explanation
                );
                items.push(
                    EvidenceItem::new(
                        SourceKind::Code,
                        content,
                        prediction.confidence,
                        dependency.citation(),
                        dependency.discovered,
                    )
                    .with_suggestion(suggestion.clone()),
                );
            }
        }

        items.truncate(filters.max_items);
        items
    }
}
