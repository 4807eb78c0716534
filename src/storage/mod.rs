//! Storage layer.
//!
//! SQLite-backed persistence for memory records (the MEMORY evidence
//! source), submitted feedback, and the composition log.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// A remembered fact or decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique memory identifier.
    pub id: String,
    /// Free-text content.
    pub content: String,
    /// Code location the memory is about (path or path:line).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the memory was recorded.
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Create a memory with a fresh id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            location: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a code location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Override the timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Persisted feedback for a composed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Unique record identifier.
    pub id: String,
    /// Query the feedback refers to.
    pub query_id: String,
    /// Query type name.
    pub query_type: String,
    /// Recommendation that was shown.
    pub recommended: String,
    /// `accepted`, `rejected`, or `modified`.
    pub outcome: String,
    /// What was done instead.
    pub actual_choice: Option<String>,
    /// Free-text reason.
    pub explanation: Option<String>,
    /// Who submitted it.
    pub submitter: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// One row of the composition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionLog {
    /// Unique log identifier.
    pub id: String,
    /// Query that was composed.
    pub query_id: String,
    /// Query type name.
    pub query_type: String,
    /// The question.
    pub query_text: String,
    /// Primary recommendation, if composition succeeded.
    pub recommendation: Option<String>,
    /// Overall confidence, if composition succeeded.
    pub confidence: Option<f64>,
    /// Merged evidence count.
    pub evidence_count: i64,
    /// Alternatives returned.
    pub alternative_count: i64,
    /// Sources that contributed nothing.
    pub unavailable_sources: Vec<String>,
    /// Wall time of the compose call.
    pub latency_ms: i64,
    /// Whether a result was produced.
    pub success: bool,
    /// Error message on failure.
    pub error: Option<String>,
    /// When the composition finished.
    pub created_at: DateTime<Utc>,
}

impl CompositionLog {
    /// Start a log entry for a query.
    pub fn new(
        query_id: impl Into<String>,
        query_type: impl Into<String>,
        query_text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query_id: query_id.into(),
            query_type: query_type.into(),
            query_text: query_text.into(),
            recommendation: None,
            confidence: None,
            evidence_count: 0,
            alternative_count: 0,
            unavailable_sources: Vec::new(),
            latency_ms: 0,
            success: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Mark as successful.
    pub fn succeeded(
        mut self,
        recommendation: impl Into<String>,
        confidence: f64,
        evidence_count: usize,
        alternative_count: usize,
    ) -> Self {
        self.recommendation = Some(recommendation.into());
        self.confidence = Some(confidence);
        self.evidence_count = evidence_count as i64;
        self.alternative_count = alternative_count as i64;
        self.success = true;
        self.error = None;
        self
    }

    /// Mark as failed.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Record which sources stayed silent.
    pub fn with_unavailable(mut self, sources: Vec<String>) -> Self {
        self.unavailable_sources = sources;
        self
    }

    /// Record wall time.
    pub fn with_latency(mut self, latency_ms: i64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Storage trait for memories, feedback, and the composition log.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a memory record.
    async fn store_memory(&self, memory: &MemoryRecord) -> StorageResult<()>;
    /// Fetch a memory by id.
    async fn get_memory(&self, id: &str) -> StorageResult<Option<MemoryRecord>>;
    /// Memories whose content, location, or tags contain any keyword, newest first.
    async fn search_memories(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> StorageResult<Vec<MemoryRecord>>;
    /// Number of stored memories.
    async fn count_memories(&self) -> StorageResult<i64>;

    /// Persist feedback.
    async fn record_feedback(&self, feedback: &FeedbackRecord) -> StorageResult<()>;
    /// Feedback submitted for a query, oldest first.
    async fn feedback_for_query(&self, query_id: &str) -> StorageResult<Vec<FeedbackRecord>>;

    /// Append to the composition log.
    async fn log_composition(&self, log: &CompositionLog) -> StorageResult<()>;
    /// Most recent composition log entries, newest first.
    async fn recent_compositions(&self, limit: usize) -> StorageResult<Vec<CompositionLog>>;
}
