use std::collections::TryReserveError;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Composition error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Memory not found: {memory_id}")]
    MemoryNotFound { memory_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    /// A failure the caller can act on; rendered with its suggestion.
    #[error("{message}")]
    ToolFailed { message: String, suggestion: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while creating or composing a query.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Empty query text or malformed configuration. Nothing is created.
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Resource exhaustion while building a result.
    #[error("Allocation failed: {message}")]
    Allocation { message: String },

    /// None of the enabled sources produced evidence.
    #[error("No evidence collected for query {query_id} ({unavailable} of {requested} sources unavailable)")]
    NoEvidence {
        query_id: String,
        requested: usize,
        unavailable: usize,
    },
}

impl ComposeError {
    /// Shorthand for an input validation failure.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ComposeError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Actionable hint for the caller.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ComposeError::InvalidInput { .. } => {
                "Provide a non-empty question and check the query options"
            }
            ComposeError::Allocation { .. } => "Retry the query with fewer sources or results",
            ComposeError::NoEvidence { requested: 0, .. } => {
                "Enable at least one evidence source (memory, code, pattern, reasoning, experience)"
            }
            ComposeError::NoEvidence { .. } => {
                "Rephrase the question with concrete names, or enable more evidence sources"
            }
        }
    }
}

impl From<TryReserveError> for ComposeError {
    fn from(err: TryReserveError) -> Self {
        ComposeError::Allocation {
            message: err.to_string(),
        }
    }
}

/// Failures of a single evidence source. Absorbed by the collector.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_kind} source unavailable: {message}")]
    Unavailable {
        source_kind: String,
        message: String,
    },

    #[error("{source_kind} source timed out after {timeout_ms}ms")]
    Timeout { source_kind: String, timeout_ms: u64 },

    #[error("{source_kind} source skipped: circuit open")]
    CircuitOpen { source_kind: String },
}

/// Feedback submission errors.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Unknown query id: {query_id}")]
    UnknownQuery { query_id: String },

    #[error("Query {query_id} has no composed result")]
    NotComposed { query_id: String },
}

impl FeedbackError {
    /// Remediation hint for the caller.
    pub fn suggestion(&self) -> &'static str {
        match self {
            FeedbackError::UnknownQuery { .. } => {
                "Feedback must reference a query composed in this session; compose the query again"
            }
            FeedbackError::NotComposed { .. } => {
                "Compose the query successfully before submitting feedback on it"
            }
        }
    }
}

impl From<ComposeError> for McpError {
    fn from(err: ComposeError) -> Self {
        McpError::ToolFailed {
            suggestion: err.suggestion().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<FeedbackError> for McpError {
    fn from(err: FeedbackError) -> Self {
        McpError::ToolFailed {
            suggestion: err.suggestion().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for McpError {
    fn from(err: StorageError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Compose(e) => e.into(),
            AppError::Mcp(e) => e,
            other => McpError::ExecutionFailed {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Result type alias for query creation and composition
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Result type alias for evidence source calls
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type alias for feedback submission
pub type FeedbackResult<T> = Result<T, FeedbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "bad weights".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: bad weights");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::MemoryNotFound {
            memory_id: "mem-1".to_string(),
        };
        assert_eq!(err.to_string(), "Memory not found: mem-1");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_compose_error_display() {
        let err = ComposeError::invalid("query_text", "must not be empty");
        assert_eq!(err.to_string(), "Invalid input: query_text - must not be empty");

        let err = ComposeError::NoEvidence {
            query_id: "q_1_1".to_string(),
            requested: 3,
            unavailable: 3,
        };
        assert_eq!(
            err.to_string(),
            "No evidence collected for query q_1_1 (3 of 3 sources unavailable)"
        );
    }

    #[test]
    fn test_no_evidence_suggestion_depends_on_mask() {
        let empty_mask = ComposeError::NoEvidence {
            query_id: "q".to_string(),
            requested: 0,
            unavailable: 0,
        };
        assert!(empty_mask.suggestion().contains("Enable at least one"));

        let all_failed = ComposeError::NoEvidence {
            query_id: "q".to_string(),
            requested: 2,
            unavailable: 2,
        };
        assert!(all_failed.suggestion().contains("Rephrase"));
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Timeout {
            source_kind: "code".to_string(),
            timeout_ms: 2000,
        };
        assert_eq!(err.to_string(), "code source timed out after 2000ms");

        let err = SourceError::CircuitOpen {
            source_kind: "memory".to_string(),
        };
        assert_eq!(err.to_string(), "memory source skipped: circuit open");
    }

    #[test]
    fn test_compose_error_to_mcp_carries_suggestion() {
        let err: McpError = ComposeError::invalid("query_text", "must not be empty").into();
        match err {
            McpError::ToolFailed { message, suggestion } => {
                assert!(message.contains("query_text"));
                assert!(!suggestion.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_feedback_error_to_mcp() {
        let err: McpError = FeedbackError::UnknownQuery {
            query_id: "q_0_0".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Unknown query id: q_0_0");
    }

    #[test]
    fn test_not_composed_feedback_error_to_mcp() {
        let err: McpError = FeedbackError::NotComposed {
            query_id: "q_0_1".to_string(),
        }
        .into();
        match err {
            McpError::ToolFailed { message, suggestion } => {
                assert_eq!(message, "Query q_0_1 has no composed result");
                assert!(suggestion.starts_with("Compose the query"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_app_error_conversion_unwraps_compose() {
        let app: AppError = ComposeError::Allocation {
            message: "capacity overflow".to_string(),
        }
        .into();
        let mcp: McpError = app.into();
        assert!(matches!(mcp, McpError::ToolFailed { .. }));
    }

    #[test]
    fn test_try_reserve_error_maps_to_allocation() {
        let mut v: Vec<u64> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        let compose: ComposeError = err.into();
        assert!(matches!(compose, ComposeError::Allocation { .. }));
    }
}
