//! End-to-end tests for the composition engine
//!
//! Real sources over an in-memory database and a temporary project tree.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mcp_nous_compose::compose::{
    AccuracyLedger, Clock, ComposeEngine, ConfidenceCalculator, EvidenceCollector, EvidenceItem,
    Feedback, FactorWeights, Outcome, QueryOptions, QueryState, QueryType, SourceKind, SourceSet,
};
use mcp_nous_compose::error::{ComposeError, FeedbackError, SourceResult};
use mcp_nous_compose::knowledge::KnowledgeBase;
use mcp_nous_compose::sources::{
    CodeSource, EvidenceSource, ExperienceSource, LearnPattern, MemorySource, PatternSource,
    PatternStore, PatternType, SearchFilters,
};
use mcp_nous_compose::storage::{MemoryRecord, SqliteStorage, Storage};

struct Fixture {
    _project: TempDir,
    engine: ComposeEngine,
}

fn project_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src/util")).unwrap();
    fs::write(
        dir.path().join("src/util/logging.rs"),
        "// logging helper functions\npub fn log_line(msg: &str) {}\n",
    )
    .unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    dir
}

async fn fixture(clock: Clock) -> Fixture {
    let project = project_tree();

    let storage = SqliteStorage::new_in_memory().await.unwrap();
    storage
        .store_memory(
            &MemoryRecord::new("Decided that the logging helper code lives in util")
                .with_location("src/util/logging.rs")
                .with_tags(vec!["logging".to_string()])
                .with_created_at(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()),
        )
        .await
        .unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let patterns = Arc::new(PatternStore::new());
    let pattern_id = patterns
        .learn(LearnPattern {
            pattern_type: PatternType::Organization,
            name: "Shared helper modules".to_string(),
            description: "Cross-cutting helper code such as logging goes under util".to_string(),
            rationale: None,
        })
        .unwrap();
    patterns
        .add_example(&pattern_id, "src/util/logging.rs", "pub fn log_line")
        .unwrap();

    let collector = EvidenceCollector::new(Duration::from_secs(5), 10)
        .with_source(Arc::new(MemorySource::new(Arc::clone(&storage))))
        .with_source(Arc::new(CodeSource::new(project.path())))
        .with_source(Arc::new(PatternSource::new(patterns)))
        .with_source(Arc::new(ExperienceSource::new(Arc::new(
            KnowledgeBase::with_defaults(),
        ))));

    let engine = ComposeEngine::new(collector)
        .with_calculator(ConfidenceCalculator::new(FactorWeights::default()).with_clock(clock))
        .with_storage(storage);

    Fixture {
        _project: project,
        engine,
    }
}

fn placement_sources() -> QueryOptions {
    QueryOptions::default().with_sources(
        SourceSet::empty()
            .with(SourceKind::Memory)
            .with(SourceKind::Code)
            .with(SourceKind::Pattern),
    )
}

#[tokio::test]
async fn test_placement_end_to_end() {
    let fx = fixture(Clock::System).await;
    let mut query = fx
        .engine
        .create(
            "Where should the logging helper go?",
            QueryType::Placement,
            placement_sources(),
        )
        .unwrap();

    let result = fx.engine.compose(&mut query).await.unwrap().clone();

    assert!(!result.recommendation.is_empty() || !result.alternatives.is_empty());
    assert!(!result.alternatives.is_empty());
    assert!(result.confidence.overall > 0.0 && result.confidence.overall < 1.0);
    assert!(result
        .reasoning
        .iter()
        .any(|step| matches!(step.source, SourceKind::Memory | SourceKind::Code)));
    assert!(result.reasoning.iter().all(|step| step.source_count() >= 1));
    assert!(result.recommendation.contains("src/util"));
    assert_eq!(query.state(), QueryState::Composed);

    fx.engine.release(query);
}

#[tokio::test]
async fn test_result_invariants() {
    let fx = fixture(Clock::System).await;
    let options = placement_sources().with_min_alternatives(3).with_max_results(5);
    let mut query = fx
        .engine
        .create("Where should the logging helper go?", QueryType::Placement, options)
        .unwrap();

    let result = fx.engine.compose(&mut query).await.unwrap();

    assert!(result.alternatives.len() >= 3);
    assert!((result.confidence.weights.sum() - 1.0).abs() < 1e-3);
    assert!((0.0..=1.0).contains(&result.confidence.overall));

    let attributions: usize = result.reasoning.iter().map(|s| s.source_count()).sum();
    assert_eq!(attributions, result.sources.len());
    assert_eq!(attributions, result.evidence_count);

    let step_share: f64 = result.reasoning.iter().map(|s| s.contribution).sum();
    assert!((step_share - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let fx = fixture(Clock::System).await;

    let err = fx
        .engine
        .create("", QueryType::Placement, QueryOptions::default())
        .unwrap_err();

    assert!(matches!(err, ComposeError::InvalidInput { .. }));
    assert_eq!(fx.engine.live_count(), 0);
}

#[tokio::test]
async fn test_empty_source_mask_fails_without_recommendation() {
    let fx = fixture(Clock::System).await;
    let mut query = fx
        .engine
        .create(
            "Where should the logging helper go?",
            QueryType::Placement,
            QueryOptions::default().with_sources(SourceSet::empty()),
        )
        .unwrap();

    let err = fx.engine.compose(&mut query).await.unwrap_err();

    assert!(matches!(err, ComposeError::NoEvidence { requested: 0, .. }));
    assert_eq!(query.state(), QueryState::Failed);
    assert!(query.result().is_none());
}

#[tokio::test]
async fn test_unknown_feedback_leaves_ledger_unchanged() {
    let fx = fixture(Clock::System).await;
    let before = fx.engine.ledger().snapshot();

    let err = fx
        .engine
        .submit_feedback(Feedback::new("q_never_created", QueryType::Impact, Outcome::Accepted))
        .await
        .unwrap_err();

    assert!(matches!(err, FeedbackError::UnknownQuery { .. }));
    assert_eq!(fx.engine.ledger().snapshot(), before);
}

#[tokio::test]
async fn test_released_query_rejects_feedback() {
    let fx = fixture(Clock::System).await;
    let query = fx
        .engine
        .create("What breaks if logging changes?", QueryType::Impact, QueryOptions::default())
        .unwrap();
    let id = query.id().to_string();
    fx.engine.release(query);

    let outcome = fx
        .engine
        .submit_feedback(Feedback::new(id, QueryType::Impact, Outcome::Accepted))
        .await;
    assert!(outcome.is_err());
    assert_eq!(fx.engine.accuracy(QueryType::Impact), 0.5);
}

#[tokio::test]
async fn test_uncomposed_query_rejects_feedback() {
    let fx = fixture(Clock::System).await;
    let mut query = fx
        .engine
        .create(
            "What breaks if logging changes?",
            QueryType::Impact,
            QueryOptions::default().with_sources(SourceSet::empty()),
        )
        .unwrap();

    let err = fx
        .engine
        .submit_feedback(Feedback::new(query.id(), QueryType::Impact, Outcome::Accepted))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedbackError::NotComposed { .. }));

    assert!(fx.engine.compose(&mut query).await.is_err());
    let err = fx
        .engine
        .submit_feedback(Feedback::new(query.id(), QueryType::Impact, Outcome::Rejected))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedbackError::NotComposed { .. }));
    assert_eq!(fx.engine.accuracy(QueryType::Impact), 0.5);
}

async fn feedback_run(outcome: Outcome) -> f64 {
    let fx = fixture(Clock::System).await;
    let mut previous = fx.engine.accuracy(QueryType::Impact);
    for _ in 0..10 {
        let mut query = fx
            .engine
            .create("What breaks if logging changes?", QueryType::Impact, QueryOptions::default())
            .unwrap();
        fx.engine.compose(&mut query).await.unwrap();
        let updated = fx
            .engine
            .submit_feedback(Feedback::new(query.id(), QueryType::Impact, outcome))
            .await
            .unwrap();
        match outcome {
            Outcome::Accepted => assert!(updated > previous),
            Outcome::Rejected => assert!(updated < previous),
            Outcome::Modified => {}
        }
        previous = updated;
        fx.engine.release(query);
    }
    fx.engine.accuracy(QueryType::Impact)
}

#[tokio::test]
async fn test_accepted_feedback_raises_accuracy() {
    assert!(feedback_run(Outcome::Accepted).await > 0.5);
}

#[tokio::test]
async fn test_rejected_feedback_lowers_accuracy() {
    assert!(feedback_run(Outcome::Rejected).await < 0.5);
}

#[tokio::test]
async fn test_feedback_is_persisted_as_memory() {
    let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
    storage
        .store_memory(
            &MemoryRecord::new("Parsers sit next to their callers").with_location("src/util/parse.rs"),
        )
        .await
        .unwrap();
    let shared: Arc<dyn Storage> = storage.clone();
    let collector = EvidenceCollector::new(Duration::from_secs(1), 5)
        .with_source(Arc::new(MemorySource::new(Arc::clone(&shared))));
    let engine = ComposeEngine::new(collector)
        .with_ledger(Arc::new(AccuracyLedger::new(0.2)))
        .with_storage(shared);

    let mut query = engine
        .create("Where should parsers go?", QueryType::Placement, QueryOptions::default())
        .unwrap();
    engine.compose(&mut query).await.unwrap();
    engine
        .submit_feedback(
            Feedback::new(query.id(), QueryType::Placement, Outcome::Rejected)
                .with_recommended("Place it in src/util")
                .with_explanation("Parsers belong in src/parse")
                .with_actual_choice("src/parse"),
        )
        .await
        .unwrap();

    let stored = storage.feedback_for_query(query.id()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].outcome, "rejected");

    let memories = storage
        .search_memories(&["feedback".to_string()], 10)
        .await
        .unwrap();
    assert_eq!(memories.len(), 1);
    assert!(memories[0]
        .content
        .starts_with("Feedback: recommendation 'Place it in src/util' was rejected."));
}

#[tokio::test]
async fn test_identical_queries_compose_identically() {
    let clock = Clock::Fixed(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
    let fx = fixture(clock).await;

    let mut first = fx
        .engine
        .create("Where should the logging helper go?", QueryType::Placement, placement_sources())
        .unwrap();
    let mut second = fx
        .engine
        .create("Where should the logging helper go?", QueryType::Placement, placement_sources())
        .unwrap();

    let a = fx.engine.compose(&mut first).await.unwrap().clone();
    let b = fx.engine.compose(&mut second).await.unwrap().clone();

    let order = |r: &mcp_nous_compose::CompositionResult| -> Vec<String> {
        r.alternatives.iter().map(|a| a.description.clone()).collect()
    };
    assert_eq!(order(&a), order(&b));
    assert_eq!(a.confidence.overall, b.confidence.overall);
    assert_eq!(a.recommendation, b.recommendation);
}

struct StalledSource;

#[async_trait]
impl EvidenceSource for StalledSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Reasoning
    }

    async fn search(
        &self,
        _query_text: &str,
        _query_type: QueryType,
        _filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_stalled_source_is_absorbed() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    storage
        .store_memory(&MemoryRecord::new("Cache invalidation is handled in src/cache"))
        .await
        .unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let collector = EvidenceCollector::new(Duration::from_millis(100), 5)
        .with_source(Arc::new(MemorySource::new(storage)))
        .with_source(Arc::new(StalledSource));
    let engine = ComposeEngine::new(collector);

    let options = QueryOptions::default().with_sources(
        SourceSet::empty()
            .with(SourceKind::Memory)
            .with(SourceKind::Reasoning),
    );
    let mut query = engine
        .create("What breaks if cache invalidation changes?", QueryType::Impact, options)
        .unwrap();

    let started = std::time::Instant::now();
    let result = engine.compose(&mut query).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.unavailable_sources.len(), 1);
    assert_eq!(result.unavailable_sources[0].source, SourceKind::Reasoning);
    assert!(result.unavailable_sources[0].reason.contains("timed out"));
    assert!(result.confidence.source_agreement < 1.0);
}
