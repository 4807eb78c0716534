//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state: the composition engine, its evidence
//!   sources, and the queries retained for later feedback

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::compose::{
    AccuracyLedger, ComposeEngine, CompositionResult, ConfidenceCalculator, EvidenceCollector,
    QueryOptions, QueryType,
};
use crate::config::Config;
use crate::error::{AppResult, ComposeResult};
use crate::knowledge::KnowledgeBase;
use crate::langbase::LangbaseClient;
use crate::sources::{
    CodeSource, ExperienceSource, ImpactStore, MemorySource, PatternSource, PatternStore,
    ReasoningSource,
};
use crate::storage::{SqliteStorage, Storage};

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Composition engine with every source registered.
    pub engine: ComposeEngine,
    /// Best practices and anti-patterns behind EXPERIENCE evidence.
    pub knowledge: Arc<KnowledgeBase>,
    /// Learned conventions behind PATTERN evidence.
    pub patterns: Arc<PatternStore>,
    /// Dependency graph and change history behind impact evidence.
    pub impact: Arc<ImpactStore>,
    retained: Mutex<VecDeque<crate::compose::Query>>,
}

impl AppState {
    /// Create application state with a seeded knowledge base.
    ///
    /// Builds a Langbase client when an API key is configured.
    pub fn new(config: Config, storage: SqliteStorage) -> AppResult<Self> {
        let langbase = match &config.langbase {
            Some(langbase) => Some(LangbaseClient::new(langbase, config.request.clone())?),
            None => None,
        };
        Ok(Self::with_components(
            config,
            storage,
            Arc::new(KnowledgeBase::with_defaults()),
            Arc::new(PatternStore::new()),
            langbase,
        ))
    }

    /// Create application state from explicit collaborators.
    pub fn with_components(
        config: Config,
        storage: SqliteStorage,
        knowledge: Arc<KnowledgeBase>,
        patterns: Arc<PatternStore>,
        langbase: Option<LangbaseClient>,
    ) -> Self {
        let compose = &config.compose;
        let shared: Arc<dyn Storage> = Arc::new(storage.clone());
        let impact = Arc::new(ImpactStore::new());

        let mut reasoning = ReasoningSource::new().with_patterns(Arc::clone(&patterns));
        match langbase {
            Some(client) => {
                info!(pipe = %config.pipes.reasoning, "Langbase reasoning pipe enabled");
                reasoning = reasoning.with_langbase(client, config.pipes.reasoning.clone());
            }
            None => info!("No Langbase API key configured, using local inference rules"),
        }

        let collector =
            EvidenceCollector::new(compose.source_timeout(), compose.max_items_per_source)
                .with_breaker_config(compose.breaker.clone())
                .with_source(Arc::new(MemorySource::new(Arc::clone(&shared))))
                .with_source(Arc::new(
                    CodeSource::new(compose.project_root.clone()).with_impact(Arc::clone(&impact)),
                ))
                .with_source(Arc::new(PatternSource::new(Arc::clone(&patterns))))
                .with_source(Arc::new(reasoning))
                .with_source(Arc::new(ExperienceSource::new(Arc::clone(&knowledge))));

        let engine = ComposeEngine::new(collector)
            .with_ledger(Arc::new(AccuracyLedger::new(compose.ema_alpha)))
            .with_calculator(ConfidenceCalculator::new(compose.weights))
            .with_storage(shared)
            .with_patterns(Arc::clone(&patterns));

        info!(
            project_root = %compose.project_root.display(),
            source_timeout_ms = compose.source_timeout_ms,
            retained_queries = compose.retained_queries,
            "AppState initialized"
        );

        Self {
            config,
            storage,
            engine,
            knowledge,
            patterns,
            impact,
            retained: Mutex::new(VecDeque::new()),
        }
    }

    /// Create, compose, and retain a query.
    ///
    /// Returns the query id with a copy of its result. A query that fails to
    /// compose is released immediately.
    pub async fn compose(
        &self,
        text: &str,
        query_type: QueryType,
        options: QueryOptions,
    ) -> ComposeResult<(String, CompositionResult)> {
        let mut query = self.engine.create(text, query_type, options)?;
        let result = match self.engine.compose(&mut query).await {
            Ok(result) => result.clone(),
            Err(e) => {
                self.engine.release(query);
                return Err(e);
            }
        };
        let query_id = query.id().to_string();
        self.retain(query);
        Ok((query_id, result))
    }

    fn retain(&self, query: crate::compose::Query) {
        let capacity = self.config.compose.retained_queries.max(1);
        let evicted: Vec<_> = {
            let mut retained = self.retained.lock().unwrap_or_else(|p| p.into_inner());
            retained.push_back(query);
            let excess = retained.len().saturating_sub(capacity);
            retained.drain(..excess).collect()
        };
        for old in evicted {
            debug!(query_id = %old.id(), "Evicting retained query");
            self.engine.release(old);
        }
    }

    /// Number of queries held for feedback.
    pub fn retained_count(&self) -> usize {
        self.retained
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Recommendation text of a retained query, if any.
    pub fn retained_recommendation(&self, query_id: &str) -> Option<String> {
        let retained = self.retained.lock().unwrap_or_else(|p| p.into_inner());
        let found = retained
            .iter()
            .find(|q| q.id() == query_id)
            .and_then(|q| q.result())
            .map(|r| r.recommendation.clone());
        if found.is_none() {
            warn!(query_id = %query_id, "Query not retained");
        }
        found
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::SourceSet;
    use crate::compose::SourceKind;
    use crate::sources::DependencyType;
    use crate::config::{
        ComposeConfig, DatabaseConfig, LogFormat, LoggingConfig, PipeConfig, RequestConfig,
    };
    use std::path::PathBuf;

    pub(crate) fn create_test_config(retained_queries: usize) -> Config {
        Config {
            langbase: None,
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            pipes: PipeConfig {
                reasoning: "nous-reasoning-v1".to_string(),
            },
            compose: ComposeConfig {
                retained_queries,
                project_root: PathBuf::from("/nonexistent/nous/project"),
                ..ComposeConfig::default()
            },
        }
    }

    fn experience_only() -> QueryOptions {
        QueryOptions::default().with_sources(SourceSet::empty().with(SourceKind::Experience))
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(4), storage).unwrap();

        assert!(state.config.langbase.is_none());
        assert!(state.knowledge.practice_count() >= 2);
        assert_eq!(state.patterns.count(), 0);
        assert_eq!(state.engine.collector().registered(), SourceSet::all());
    }

    #[tokio::test]
    async fn test_compose_retains_query() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(4), storage).unwrap();

        let (query_id, result) = state
            .compose("How should error handling work?", QueryType::General, experience_only())
            .await
            .unwrap();

        assert!(state.engine.is_live(&query_id));
        assert_eq!(state.retained_count(), 1);
        assert!(!result.alternatives.is_empty());
        assert_eq!(
            state.retained_recommendation(&query_id),
            Some(result.recommendation.clone())
        );
    }

    #[tokio::test]
    async fn test_failed_compose_is_released() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(4), storage).unwrap();

        let options = QueryOptions::default().with_sources(SourceSet::empty());
        assert!(state
            .compose("Where does this go?", QueryType::Placement, options)
            .await
            .is_err());
        assert_eq!(state.retained_count(), 0);
        assert_eq!(state.engine.live_count(), 0);
    }

    #[tokio::test]
    async fn test_retained_queries_evict_oldest() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(2), storage).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (id, _) = state
                .compose("How should error handling work?", QueryType::General, experience_only())
                .await
                .unwrap();
            ids.push(id);
        }

        assert_eq!(state.retained_count(), 2);
        assert!(!state.engine.is_live(&ids[0]));
        assert!(state.engine.is_live(&ids[1]));
        assert!(state.engine.is_live(&ids[2]));
    }

    #[tokio::test]
    async fn test_impact_query_reads_dependency_graph() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(4), storage).unwrap();
        for caller in ["src/main.rs", "src/server/mod.rs"] {
            state
                .impact
                .add_dependency(caller, "parse_config", DependencyType::FunctionCall, 0.7)
                .unwrap();
        }

        let options =
            QueryOptions::default().with_sources(SourceSet::empty().with(SourceKind::Code));
        let (_, result) = state
            .compose("What breaks if parse_config changes?", QueryType::Impact, options)
            .await
            .unwrap();

        assert_eq!(result.recommendation, "Review dependents of parse_config");
        assert_eq!(result.evidence_count, 2);
        assert!(result.unavailable_sources.is_empty());
    }
}
