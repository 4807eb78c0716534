//! Integration tests for SQLite storage layer
//!
//! Tests database operations using an in-memory SQLite database.

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use mcp_nous_compose::config::DatabaseConfig;
use mcp_nous_compose::storage::{
    CompositionLog, FeedbackRecord, MemoryRecord, SqliteStorage, Storage,
};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn feedback(id: &str, query_id: &str, outcome: &str, minutes: i64) -> FeedbackRecord {
    FeedbackRecord {
        id: id.to_string(),
        query_id: query_id.to_string(),
        query_type: "placement".to_string(),
        recommended: "Place it in src/util".to_string(),
        outcome: outcome.to_string(),
        actual_choice: None,
        explanation: None,
        submitter: Some("tester".to_string()),
        created_at: Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes),
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_get_memory() {
        let storage = create_test_storage().await;

        let memory = MemoryRecord::new("Parsers live in src/parse")
            .with_location("src/parse/mod.rs:12")
            .with_tags(vec!["parser".to_string(), "layout".to_string()]);
        storage.store_memory(&memory).await.unwrap();

        let retrieved = storage.get_memory(&memory.id).await.unwrap();

        assert!(retrieved.is_some(), "Memory should exist");
        let retrieved = retrieved.unwrap();
        assert_eq!(retrieved.content, "Parsers live in src/parse");
        assert_eq!(retrieved.location.as_deref(), Some("src/parse/mod.rs:12"));
        assert_eq!(retrieved.tags, vec!["parser", "layout"]);
        assert_eq!(retrieved.created_at.timestamp(), memory.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_get_nonexistent_memory() {
        let storage = create_test_storage().await;

        let result = storage.get_memory("nonexistent-id").await.unwrap();

        assert!(result.is_none(), "Should return None for nonexistent memory");
    }

    #[tokio::test]
    async fn test_search_matches_content_location_and_tags() {
        let storage = create_test_storage().await;

        let by_content = MemoryRecord::new("The Logging setup is in main");
        let by_location = MemoryRecord::new("helpers").with_location("src/logging/mod.rs");
        let by_tag = MemoryRecord::new("tracing init").with_tags(vec!["logging".to_string()]);
        let unrelated = MemoryRecord::new("Database pool size is five");
        for memory in [&by_content, &by_location, &by_tag, &unrelated] {
            storage.store_memory(memory).await.unwrap();
        }

        let found = storage
            .search_memories(&["logging".to_string()], 10)
            .await
            .unwrap();

        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|m| m.id != unrelated.id));
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let storage = create_test_storage().await;

        let exact = MemoryRecord::new("parse_config reads the TOML file");
        let lookalike = MemoryRecord::new("parseXconfig is a different helper");
        let percent = MemoryRecord::new("Coverage must stay above 80%");
        for memory in [&exact, &lookalike, &percent] {
            storage.store_memory(memory).await.unwrap();
        }

        let found = storage
            .search_memories(&["parse_config".to_string()], 10)
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![exact.id.as_str()]);

        let found = storage
            .search_memories(&["80%".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, percent.id);

        assert!(storage
            .search_memories(&["%".to_string()], 10)
            .await
            .unwrap()
            .iter()
            .all(|m| m.content.contains('%')));
    }

    #[tokio::test]
    async fn test_search_is_newest_first_and_limited() {
        let storage = create_test_storage().await;
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        for day in 0..5 {
            let memory = MemoryRecord::new(format!("cache note {}", day))
                .with_created_at(base + Duration::days(day));
            storage.store_memory(&memory).await.unwrap();
        }

        let found = storage
            .search_memories(&["cache".to_string()], 3)
            .await
            .unwrap();

        let contents: Vec<&str> = found.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["cache note 4", "cache note 3", "cache note 2"]);
    }

    #[tokio::test]
    async fn test_search_without_keywords_returns_nothing() {
        let storage = create_test_storage().await;
        storage
            .store_memory(&MemoryRecord::new("anything"))
            .await
            .unwrap();

        assert!(storage.search_memories(&[], 10).await.unwrap().is_empty());
        assert!(storage
            .search_memories(&["anything".to_string()], 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_count_memories() {
        let storage = create_test_storage().await;
        assert_eq!(storage.count_memories().await.unwrap(), 0);

        storage.store_memory(&MemoryRecord::new("one")).await.unwrap();
        storage.store_memory(&MemoryRecord::new("two")).await.unwrap();

        assert_eq!(storage.count_memories().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_memory_id_fails() {
        let storage = create_test_storage().await;
        let memory = MemoryRecord::new("once");

        storage.store_memory(&memory).await.unwrap();
        let result = storage.store_memory(&memory).await;

        assert!(result.is_err(), "Primary key should reject duplicates");
    }
}

#[cfg(test)]
mod feedback_tests {
    use super::*;

    #[tokio::test]
    async fn test_feedback_for_query_is_oldest_first() {
        let storage = create_test_storage().await;

        storage
            .record_feedback(&feedback("fb-2", "q_1_1", "rejected", 10))
            .await
            .unwrap();
        storage
            .record_feedback(&feedback("fb-1", "q_1_1", "accepted", 0))
            .await
            .unwrap();
        storage
            .record_feedback(&feedback("fb-3", "q_1_2", "modified", 5))
            .await
            .unwrap();

        let records = storage.feedback_for_query("q_1_1").await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fb-1", "fb-2"]);
        assert_eq!(records[0].outcome, "accepted");
        assert_eq!(records[0].submitter.as_deref(), Some("tester"));
    }

    #[tokio::test]
    async fn test_invalid_outcome_is_rejected() {
        let storage = create_test_storage().await;

        let result = storage
            .record_feedback(&feedback("fb-x", "q_1_1", "ignored", 0))
            .await;

        assert!(result.is_err(), "CHECK constraint should reject unknown outcomes");
    }

    #[tokio::test]
    async fn test_feedback_for_unknown_query_is_empty() {
        let storage = create_test_storage().await;

        let records = storage.feedback_for_query("q_missing").await.unwrap();

        assert!(records.is_empty());
    }
}

#[cfg(test)]
mod composition_log_tests {
    use super::*;

    #[tokio::test]
    async fn test_log_success_and_failure() {
        let storage = create_test_storage().await;
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let mut ok = CompositionLog::new("q_1_1", "placement", "Where should logging go?")
            .succeeded("Place it in src/util", 0.62, 4, 2)
            .with_unavailable(vec!["reasoning".to_string()])
            .with_latency(15);
        ok.created_at = base;
        let mut failed =
            CompositionLog::new("q_1_2", "impact", "What breaks?").failed("no evidence");
        failed.created_at = base + Duration::seconds(5);

        storage.log_composition(&ok).await.unwrap();
        storage.log_composition(&failed).await.unwrap();

        let recent = storage.recent_compositions(10).await.unwrap();

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query_id, "q_1_2");
        assert!(!recent[0].success);
        assert_eq!(recent[0].error.as_deref(), Some("no evidence"));
        assert!(recent[0].recommendation.is_none());

        assert_eq!(recent[1].query_id, "q_1_1");
        assert!(recent[1].success);
        assert_eq!(recent[1].recommendation.as_deref(), Some("Place it in src/util"));
        assert_eq!(recent[1].confidence, Some(0.62));
        assert_eq!(recent[1].evidence_count, 4);
        assert_eq!(recent[1].alternative_count, 2);
        assert_eq!(recent[1].unavailable_sources, vec!["reasoning"]);
        assert_eq!(recent[1].latency_ms, 15);
    }

    #[tokio::test]
    async fn test_recent_compositions_limit() {
        let storage = create_test_storage().await;

        for i in 0..4 {
            let log = CompositionLog::new(format!("q_1_{}", i), "general", "question")
                .failed("no evidence");
            storage.log_composition(&log).await.unwrap();
        }

        assert_eq!(storage.recent_compositions(2).await.unwrap().len(), 2);
    }
}

#[cfg(test)]
mod file_database_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("nous.db"),
            max_connections: 2,
        };

        let memory = MemoryRecord::new("Persisted across restarts");
        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.store_memory(&memory).await.unwrap();
            storage.pool().close().await;
        }

        let reopened = SqliteStorage::new(&config).await.unwrap();
        let retrieved = reopened.get_memory(&memory.id).await.unwrap();

        assert!(config.path.exists());
        assert_eq!(retrieved.map(|m| m.content).as_deref(), Some("Persisted across restarts"));
    }
}
