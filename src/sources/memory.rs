use std::sync::Arc;

use async_trait::async_trait;

use super::{location_anchor, suggest_for, EvidenceSource, SearchFilters};
use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::{SourceError, SourceResult};
use crate::storage::{MemoryRecord, Storage};

const BASE_CONFIDENCE: f64 = 0.3;
const MATCH_WEIGHT: f64 = 0.6;

/// Keyword search over remembered facts and decisions.
pub struct MemorySource {
    storage: Arc<dyn Storage>,
}

impl MemorySource {
    /// Wrap a storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn to_evidence(
        record: MemoryRecord,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> EvidenceItem {
        let haystack = format!(
            "{} {} {}",
            record.content,
            record.location.as_deref().unwrap_or_default(),
            record.tags.join(" ")
        );
        let confidence = BASE_CONFIDENCE + MATCH_WEIGHT * filters.match_fraction(&haystack);
        let citation = record
            .location
            .clone()
            .unwrap_or_else(|| format!("memory:{}", record.id));

        let item = EvidenceItem::new(
            SourceKind::Memory,
            record.content,
            confidence,
            citation,
            record.created_at,
        );
        match record.location.as_deref().and_then(location_anchor) {
            Some(anchor) => item.with_suggestion(suggest_for(query_type, &anchor)),
            None => item,
        }
    }
}

#[async_trait]
impl EvidenceSource for MemorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    async fn search(
        &self,
        _query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>> {
        let records = self
            .storage
            .search_memories(&filters.keywords, filters.max_items)
            .await
            .map_err(|e| SourceError::Unavailable {
                source_kind: SourceKind::Memory.to_string(),
                message: e.to_string(),
            })?;

        Ok(records
            .into_iter()
            .map(|record| Self::to_evidence(record, query_type, filters))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn source_with(memories: Vec<MemoryRecord>) -> MemorySource {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        for memory in &memories {
            storage.store_memory(memory).await.unwrap();
        }
        MemorySource::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_located_memory_suggests_its_directory() {
        let source = source_with(vec![MemoryRecord::new(
            "All logging helpers live next to the logger",
        )
        .with_location("src/util/log.rs")])
        .await;

        let filters = SearchFilters::for_query("Where should the logging helper go?", 10);
        let items = source
            .search("", QueryType::Placement, &filters)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].citation, "src/util/log.rs");
        assert_eq!(items[0].suggestion.as_deref(), Some("Place it in src/util"));
        assert!(items[0].confidence > BASE_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_unlocated_memory_cites_its_id() {
        let memory = MemoryRecord::new("Feedback: recommendation 'x' was rejected. logging");
        let id = memory.id.clone();
        let source = source_with(vec![memory]).await;

        let filters = SearchFilters::for_query("logging", 10);
        let items = source.search("", QueryType::General, &filters).await.unwrap();
        assert_eq!(items[0].citation, format!("memory:{}", id));
        assert!(items[0].suggestion.is_none());
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let source = source_with(vec![MemoryRecord::new("database pooling")]).await;
        let filters = SearchFilters::for_query("logging helper", 10);
        let items = source.search("", QueryType::General, &filters).await.unwrap();
        assert!(items.is_empty());
    }
}
