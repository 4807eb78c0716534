//! Cross-project knowledge base.
//!
//! An injectable registry of best practices and anti-patterns. Practices
//! back EXPERIENCE evidence as supporting items, anti-patterns as cautionary
//! ones. Ids are stable (`practice_<n>`, `antipattern_<n>`) and the registry
//! grows without a fixed capacity.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ComposeError, ComposeResult};

/// Adoption assumed for a newly recorded practice.
pub const DEFAULT_ADOPTION_RATE: f64 = 0.7;
/// Effectiveness assumed for a newly recorded practice.
pub const DEFAULT_EFFECTIVENESS: f64 = 0.8;

/// Seed practices: name, description, rationale, category.
const DEFAULT_PRACTICES: &[(&str, &str, &str, &str)] = &[
    (
        "Error Handling with single cleanup path",
        "Route every error exit through one cleanup path",
        "Prevents resource leaks and simplifies error paths",
        "error_handling",
    ),
    (
        "Input Parameter Validation",
        "Validate all parameters at function entry",
        "Prevents crashes and undefined behavior",
        "safety",
    ),
];

/// Seed anti-patterns: name, description, why it hurts, better alternative.
const DEFAULT_ANTIPATTERNS: &[(&str, &str, &str, &str)] = &[(
    "God Object",
    "Single class or module that does too many things",
    "Hard to maintain, test, and understand",
    "Split into focused, single-responsibility modules",
)];

/// A practice observed to work across projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPractice {
    /// Stable id, `practice_<n>`.
    pub id: String,
    /// Practice name.
    pub name: String,
    /// What the practice is.
    pub description: String,
    /// Why it is a good idea.
    pub rationale: Option<String>,
    /// Category such as `error_handling` or `testing`.
    pub category: String,
    /// Projects known to use it.
    pub example_projects: Vec<String>,
    /// How widely it is adopted, in [0, 1].
    pub adoption_rate: f64,
    /// How well it works, in [0, 1].
    pub effectiveness: f64,
    /// Whether it is recommended.
    pub recommended: bool,
}

/// Something to avoid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPattern {
    /// Stable id, `antipattern_<n>`.
    pub id: String,
    /// Anti-pattern name.
    pub name: String,
    /// What to avoid.
    pub description: String,
    /// Why it hurts.
    pub why_bad: String,
    /// Typical fallout.
    pub consequences: Vec<String>,
    /// What to do instead.
    pub better_alternative: Option<String>,
}

/// A project whose knowledge was imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectKnowledge {
    /// Project name.
    pub name: String,
    /// Domain, e.g. `systems` or `web`.
    pub domain: String,
    /// Assessed quality in [0, 1].
    pub quality: f64,
}

/// Input for [`KnowledgeBase::add_practice`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPractice {
    /// Practice name.
    pub name: String,
    /// What the practice is.
    pub description: String,
    /// Why it is a good idea.
    #[serde(default)]
    pub rationale: Option<String>,
    /// Category.
    pub category: String,
}

/// Input for [`KnowledgeBase::add_antipattern`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAntiPattern {
    /// Anti-pattern name.
    pub name: String,
    /// What to avoid.
    pub description: String,
    /// Why it hurts.
    pub why_bad: String,
    /// Typical fallout.
    #[serde(default)]
    pub consequences: Vec<String>,
    /// What to do instead.
    #[serde(default)]
    pub better_alternative: Option<String>,
}

#[derive(Debug, Default)]
struct Registry {
    practices: Vec<BestPractice>,
    antipatterns: Vec<AntiPattern>,
    projects: Vec<ProjectKnowledge>,
    next_practice: u64,
    next_antipattern: u64,
}

/// Growable registry of practices and anti-patterns.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    inner: RwLock<Registry>,
}

fn required(field: &str, value: &str) -> ComposeResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ComposeError::invalid(field, "must not be empty"));
    }
    Ok(value.to_string())
}

impl KnowledgeBase {
    /// Create an empty knowledge base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a knowledge base seeded with general-purpose entries.
    pub fn with_defaults() -> Self {
        let kb = Self::new();
        for (name, description, rationale, category) in DEFAULT_PRACTICES {
            let seeded = kb.add_practice(NewPractice {
                name: name.to_string(),
                description: description.to_string(),
                rationale: Some(rationale.to_string()),
                category: category.to_string(),
            });
            if let Err(e) = seeded {
                warn!(practice = name, error = %e, "Failed to seed practice");
            }
        }
        for (name, description, why_bad, alternative) in DEFAULT_ANTIPATTERNS {
            let seeded = kb.add_antipattern(NewAntiPattern {
                name: name.to_string(),
                description: description.to_string(),
                why_bad: why_bad.to_string(),
                consequences: Vec::new(),
                better_alternative: Some(alternative.to_string()),
            });
            if let Err(e) = seeded {
                warn!(antipattern = name, error = %e, "Failed to seed anti-pattern");
            }
        }
        info!(
            practices = kb.practice_count(),
            antipatterns = kb.antipattern_count(),
            "Knowledge base initialized"
        );
        kb
    }

    /// Record a best practice and return its id.
    pub fn add_practice(&self, input: NewPractice) -> ComposeResult<String> {
        let name = required("name", &input.name)?;
        let description = required("description", &input.description)?;
        let category = required("category", &input.category)?;

        let mut registry = self.inner.write().unwrap_or_else(|p| p.into_inner());
        registry.practices.try_reserve(1)?;
        registry.next_practice += 1;
        let id = format!("practice_{}", registry.next_practice);
        registry.practices.push(BestPractice {
            id: id.clone(),
            name,
            description,
            rationale: input.rationale.filter(|r| !r.trim().is_empty()),
            category: category.clone(),
            example_projects: Vec::new(),
            adoption_rate: DEFAULT_ADOPTION_RATE,
            effectiveness: DEFAULT_EFFECTIVENESS,
            recommended: true,
        });

        debug!(practice_id = %id, category = %category, "Added best practice");
        Ok(id)
    }

    /// Record an anti-pattern and return its id.
    pub fn add_antipattern(&self, input: NewAntiPattern) -> ComposeResult<String> {
        let name = required("name", &input.name)?;
        let description = required("description", &input.description)?;
        let why_bad = required("why_bad", &input.why_bad)?;

        let mut registry = self.inner.write().unwrap_or_else(|p| p.into_inner());
        registry.antipatterns.try_reserve(1)?;
        registry.next_antipattern += 1;
        let id = format!("antipattern_{}", registry.next_antipattern);
        registry.antipatterns.push(AntiPattern {
            id: id.clone(),
            name,
            description,
            why_bad,
            consequences: input.consequences,
            better_alternative: input.better_alternative.filter(|a| !a.trim().is_empty()),
        });

        debug!(antipattern_id = %id, "Added anti-pattern");
        Ok(id)
    }

    /// Practices, optionally restricted to one category, in insertion order.
    pub fn practices(&self, category: Option<&str>) -> Vec<BestPractice> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .practices
            .iter()
            .filter(|p| category.map_or(true, |c| p.category == c))
            .cloned()
            .collect()
    }

    /// All anti-patterns, in insertion order.
    pub fn antipatterns(&self) -> Vec<AntiPattern> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .antipatterns
            .clone()
    }

    /// Record a project and derive a practice from it.
    pub fn import_project(&self, name: &str, domain: &str, quality: f64) -> ComposeResult<String> {
        let name = required("project_name", name)?;
        let domain = required("domain", domain)?;
        if !(0.0..=1.0).contains(&quality) {
            return Err(ComposeError::invalid(
                "quality",
                format!("{} is outside [0, 1]", quality),
            ));
        }

        let id = self.add_practice(NewPractice {
            name: format!("Practice from {}", name),
            description: "Project-specific best practice".to_string(),
            rationale: Some("Learned from successful project".to_string()),
            category: domain.clone(),
        })?;

        let mut registry = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if let Some(practice) = registry.practices.iter_mut().find(|p| p.id == id) {
            practice.example_projects.push(name.clone());
        }
        registry.projects.push(ProjectKnowledge {
            name: name.clone(),
            domain: domain.clone(),
            quality,
        });

        info!(project = %name, domain = %domain, quality, "Imported project knowledge");
        Ok(id)
    }

    /// Imported projects.
    pub fn projects(&self) -> Vec<ProjectKnowledge> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .projects
            .clone()
    }

    /// Number of practices.
    pub fn practice_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .practices
            .len()
    }

    /// Number of anti-patterns.
    pub fn antipattern_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .antipatterns
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn practice(name: &str, category: &str) -> NewPractice {
        NewPractice {
            name: name.to_string(),
            description: "desc".to_string(),
            rationale: None,
            category: category.to_string(),
        }
    }

    #[test]
    fn test_defaults_are_seeded() {
        let kb = KnowledgeBase::with_defaults();
        assert_eq!(kb.practice_count(), 2);
        assert_eq!(kb.antipattern_count(), 1);
        assert_eq!(kb.practices(Some("safety")).len(), 1);
        assert_eq!(
            kb.antipatterns()[0].better_alternative.as_deref(),
            Some("Split into focused, single-responsibility modules")
        );
    }

    #[test]
    fn test_ids_are_sequential_and_stable() {
        let kb = KnowledgeBase::new();
        assert_eq!(kb.add_practice(practice("a", "testing")).unwrap(), "practice_1");
        assert_eq!(kb.add_practice(practice("b", "testing")).unwrap(), "practice_2");
        let p = &kb.practices(None)[0];
        assert_eq!(p.adoption_rate, DEFAULT_ADOPTION_RATE);
        assert_eq!(p.effectiveness, DEFAULT_EFFECTIVENESS);
    }

    #[test]
    fn test_grows_past_small_limits() {
        let kb = KnowledgeBase::new();
        for i in 0..500 {
            kb.add_practice(practice(&format!("p{}", i), "naming")).unwrap();
        }
        assert_eq!(kb.practice_count(), 500);
    }

    #[test]
    fn test_required_fields() {
        let kb = KnowledgeBase::new();
        assert!(kb.add_practice(practice("", "testing")).is_err());
        assert!(kb.add_practice(practice("a", " ")).is_err());
        assert!(kb
            .add_antipattern(NewAntiPattern {
                name: "x".to_string(),
                description: "y".to_string(),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn test_import_project() {
        let kb = KnowledgeBase::new();
        let id = kb.import_project("ripgrep", "systems", 0.9).unwrap();
        let practices = kb.practices(Some("systems"));
        assert_eq!(practices[0].id, id);
        assert_eq!(practices[0].name, "Practice from ripgrep");
        assert_eq!(practices[0].example_projects, vec!["ripgrep".to_string()]);
        assert_eq!(kb.projects().len(), 1);
        assert!(kb.import_project("x", "web", 1.5).is_err());
    }

    #[test]
    fn test_independent_instances() {
        let a = KnowledgeBase::new();
        let b = KnowledgeBase::new();
        a.add_practice(practice("only in a", "testing")).unwrap();
        assert_eq!(a.practice_count(), 1);
        assert_eq!(b.practice_count(), 0);
    }
}
