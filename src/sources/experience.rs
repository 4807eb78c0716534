use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{EvidenceSource, SearchFilters};
use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::SourceResult;
use crate::knowledge::KnowledgeBase;

/// Confidence ceiling of an anti-pattern warning.
const ANTIPATTERN_CONFIDENCE: f64 = 0.6;

/// Cross-project practices and anti-patterns.
pub struct ExperienceSource {
    knowledge: Arc<KnowledgeBase>,
}

impl ExperienceSource {
    /// Wrap a knowledge base.
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl EvidenceSource for ExperienceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Experience
    }

    async fn search(
        &self,
        _query_text: &str,
        _query_type: QueryType,
        filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>> {
        let now = Utc::now();
        let mut items = Vec::new();

        for practice in self.knowledge.practices(None) {
            if !practice.recommended {
                continue;
            }
            let relevance = filters.match_fraction(&format!(
                "{} {} {} {}",
                practice.name,
                practice.description,
                practice.rationale.as_deref().unwrap_or_default(),
                practice.category.replace('_', " ")
            ));
            if relevance == 0.0 {
                continue;
            }
            let confidence = 0.5
                * (practice.adoption_rate + practice.effectiveness)
                * (0.5 + 0.5 * relevance);
            items.push(
                EvidenceItem::new(
                    SourceKind::Experience,
                    format!("Best practice '{}': {}", practice.name, practice.description),
                    confidence,
                    practice.id,
                    now,
                )
                .with_suggestion(format!("Apply the \"{}\" practice", practice.name)),
            );
        }

        for antipattern in self.knowledge.antipatterns() {
            let relevance = filters.match_fraction(&format!(
                "{} {} {}",
                antipattern.name, antipattern.description, antipattern.why_bad
            ));
            if relevance == 0.0 {
                continue;
            }
            let item = EvidenceItem::new(
                SourceKind::Experience,
                format!(
                    "Avoid '{}': {} ({})",
                    antipattern.name, antipattern.description, antipattern.why_bad
                ),
                ANTIPATTERN_CONFIDENCE * (0.5 + 0.5 * relevance),
                antipattern.id,
                now,
            )
            .cautionary();
            items.push(match antipattern.better_alternative {
                Some(alternative) => item.with_suggestion(alternative),
                None => item,
            });
        }

        items.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.citation.cmp(&b.citation))
        });
        items.truncate(filters.max_items);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::Stance;

    #[tokio::test]
    async fn test_practice_is_supporting() {
        let source = ExperienceSource::new(Arc::new(KnowledgeBase::with_defaults()));
        let filters = SearchFilters::for_query("How should error handling work here?", 10);
        let items = source.search("", QueryType::General, &filters).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].citation, "practice_1");
        assert_eq!(items[0].stance, Stance::Supporting);
        assert!(items[0]
            .suggestion
            .as_deref()
            .unwrap()
            .contains("Error Handling"));
    }

    #[tokio::test]
    async fn test_antipattern_is_cautionary() {
        let source = ExperienceSource::new(Arc::new(KnowledgeBase::with_defaults()));
        let filters = SearchFilters::for_query("Is one god object module ok?", 10);
        let items = source.search("", QueryType::General, &filters).await.unwrap();

        let warning = items
            .iter()
            .find(|i| i.citation == "antipattern_1")
            .unwrap();
        assert_eq!(warning.stance, Stance::Cautionary);
        assert_eq!(
            warning.suggestion.as_deref(),
            Some("Split into focused, single-responsibility modules")
        );
        assert!(warning.confidence > ANTIPATTERN_CONFIDENCE * 0.5);
        assert!(warning.confidence <= ANTIPATTERN_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_unrelated_query_is_empty() {
        let source = ExperienceSource::new(Arc::new(KnowledgeBase::with_defaults()));
        let filters = SearchFilters::for_query("zebra xylophone", 10);
        let items = source.search("", QueryType::General, &filters).await.unwrap();
        assert!(items.is_empty());
    }
}
