use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    build_trace, AccuracyLedger, AlternativeGenerator, CollectedEvidence, CompositionResult,
    ConfidenceCalculator, EvidenceCollector, Feedback, Outcome, Query, QueryOptions, QueryState,
    QueryType,
};
use crate::error::{ComposeError, ComposeResult, FeedbackError, FeedbackResult};
use crate::sources::{PatternStore, PATTERN_CITATION_PREFIX};
use crate::storage::{CompositionLog, FeedbackRecord, MemoryRecord, Storage};

static QUERY_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_query_id() -> String {
    let n = QUERY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("q_{}_{}", Utc::now().timestamp(), n)
}

/// Feedback bookkeeping for a created query.
///
/// `token` dies with the [`Query`], so a query dropped without `release`
/// stops accepting feedback too.
struct LiveEntry {
    query_type: QueryType,
    token: Weak<()>,
    composed: bool,
    pattern_ids: Vec<String>,
}

impl LiveEntry {
    fn is_alive(&self) -> bool {
        self.token.strong_count() > 0
    }
}

/// Orchestrates query creation, composition, release, and feedback.
///
/// Queries are independent; the only shared mutable state is the accuracy
/// ledger and the set of live query ids used to validate feedback.
pub struct ComposeEngine {
    collector: EvidenceCollector,
    calculator: ConfidenceCalculator,
    ledger: Arc<AccuracyLedger>,
    live: RwLock<HashMap<String, LiveEntry>>,
    storage: Option<Arc<dyn Storage>>,
    patterns: Option<Arc<PatternStore>>,
}

impl ComposeEngine {
    /// Create an engine with default weights and a fresh ledger.
    pub fn new(collector: EvidenceCollector) -> Self {
        Self {
            collector,
            calculator: ConfidenceCalculator::default(),
            ledger: Arc::new(AccuracyLedger::default()),
            live: RwLock::new(HashMap::new()),
            storage: None,
            patterns: None,
        }
    }

    /// Share an existing ledger.
    pub fn with_ledger(mut self, ledger: Arc<AccuracyLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Replace the confidence calculator (weights, clock).
    pub fn with_calculator(mut self, calculator: ConfidenceCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Persist composition logs and feedback.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Feed outcomes back into the patterns cited by accepted or rejected
    /// recommendations.
    pub fn with_patterns(mut self, patterns: Arc<PatternStore>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Create a query. Fails on empty text or out-of-range options.
    pub fn create(
        &self,
        text: &str,
        query_type: QueryType,
        options: QueryOptions,
    ) -> ComposeResult<Query> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ComposeError::invalid("query", "query text must not be empty"));
        }
        if !(0.0..=1.0).contains(&options.min_confidence) {
            return Err(ComposeError::invalid(
                "min_confidence",
                format!("{} is outside [0, 1]", options.min_confidence),
            ));
        }
        if options.max_results == 0 {
            return Err(ComposeError::invalid("max_results", "must be at least 1"));
        }

        let query = Query {
            id: next_query_id(),
            text: text.to_string(),
            query_type,
            options,
            state: QueryState::Created,
            result: None,
            created_at: Utc::now(),
            liveness: Arc::new(()),
        };

        {
            let mut live = self.live.write().unwrap_or_else(|p| p.into_inner());
            live.retain(|_, entry| entry.is_alive());
            live.insert(
                query.id.clone(),
                LiveEntry {
                    query_type,
                    token: Arc::downgrade(&query.liveness),
                    composed: false,
                    pattern_ids: Vec::new(),
                },
            );
        }

        info!(
            query_id = %query.id,
            query_type = %query_type,
            sources = %query.options.sources,
            "Query created"
        );
        Ok(query)
    }

    /// Run the full pipeline and attach the result to the query.
    ///
    /// Composing an already composed query replaces the previous result.
    pub async fn compose<'q>(&self, query: &'q mut Query) -> ComposeResult<&'q CompositionResult> {
        let start = Instant::now();
        query.result = None;
        query.state = QueryState::Composing;
        self.mark(&query.id, None);

        info!(
            query_id = %query.id,
            query_type = %query.query_type,
            "Composing recommendation"
        );

        let collected = self
            .collector
            .collect(&query.text, query.query_type, &query.options.sources)
            .await;

        if collected.is_empty() {
            query.state = QueryState::Failed;
            let err = ComposeError::NoEvidence {
                query_id: query.id.clone(),
                requested: query.options.sources.len(),
                unavailable: collected.unavailable.len(),
            };
            warn!(query_id = %query.id, error = %err, "Composition failed");
            self.log(query, &collected, start, Err(&err)).await;
            return Err(err);
        }

        let (result, pattern_ids) = match self.assemble(query, &collected) {
            Ok(assembled) => assembled,
            Err(err) => {
                query.state = QueryState::Failed;
                warn!(query_id = %query.id, error = %err, "Composition failed");
                self.log(query, &collected, start, Err(&err)).await;
                return Err(err);
            }
        };

        info!(
            query_id = %query.id,
            evidence_count = result.evidence_count,
            alternatives = result.alternatives.len(),
            confidence = result.confidence.overall,
            unavailable = result.unavailable_sources.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Composition complete"
        );
        self.log(query, &collected, start, Ok(&result)).await;

        query.state = QueryState::Composed;
        self.mark(&query.id, Some(pattern_ids));
        Ok(query.result.insert(result))
    }

    /// Record whether the query now holds a result and which patterns back it.
    fn mark(&self, query_id: &str, pattern_ids: Option<Vec<String>>) {
        let mut live = self.live.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = live.get_mut(query_id) {
            entry.composed = pattern_ids.is_some();
            entry.pattern_ids = pattern_ids.unwrap_or_default();
        }
    }

    fn assemble(
        &self,
        query: &Query,
        collected: &CollectedEvidence,
    ) -> ComposeResult<(CompositionResult, Vec<String>)> {
        let evidence = &collected.items;
        let historical = self.ledger.get(query.query_type);
        let requested = query.options.sources.len();

        let ranking = AlternativeGenerator::new(&self.calculator).generate(
            evidence,
            &query.text,
            query.query_type,
            historical,
            &query.options,
        )?;
        let confidence = self
            .calculator
            .calculate(evidence, &query.text, historical, requested);
        let trace = build_trace(evidence)?;

        debug!(
            query_id = %query.id,
            explanation = %confidence.explanation,
            "Confidence computed"
        );

        let mut pattern_ids: Vec<String> = ranking
            .supporting_citations
            .iter()
            .filter_map(|c| c.strip_prefix(PATTERN_CITATION_PREFIX))
            .map(str::to_string)
            .collect();
        pattern_ids.sort();
        pattern_ids.dedup();

        let result = CompositionResult {
            recommendation: ranking.recommendation,
            reasoning: trace.steps,
            alternatives: ranking.alternatives,
            confidence,
            sources: trace.attributions,
            unavailable_sources: collected.unavailable.clone(),
            evidence_count: evidence.len(),
        };
        Ok((result, pattern_ids))
    }

    async fn log(
        &self,
        query: &Query,
        collected: &CollectedEvidence,
        start: Instant,
        outcome: Result<&CompositionResult, &ComposeError>,
    ) {
        let Some(storage) = &self.storage else {
            return;
        };

        let unavailable = collected
            .unavailable
            .iter()
            .map(|u| u.source.to_string())
            .collect();
        let entry = CompositionLog::new(&query.id, query.query_type.as_str(), &query.text)
            .with_unavailable(unavailable)
            .with_latency(start.elapsed().as_millis() as i64);
        let entry = match outcome {
            Ok(result) => entry.succeeded(
                &result.recommendation,
                result.confidence.overall,
                result.evidence_count,
                result.alternatives.len(),
            ),
            Err(err) => entry.failed(err.to_string()),
        };

        if let Err(e) = storage.log_composition(&entry).await {
            warn!(query_id = %query.id, error = %e, "Failed to log composition");
        }
    }

    /// Tear down a query and its result. Later feedback for its id fails.
    pub fn release(&self, query: Query) {
        let removed = self
            .live
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&query.id);
        if removed.is_some() {
            debug!(query_id = %query.id, "Query released");
        }
    }

    /// Feed an outcome into the accuracy ledger.
    ///
    /// Returns the updated accuracy for the query's type. Unknown, released,
    /// dropped, or uncomposed queries leave the ledger untouched.
    pub async fn submit_feedback(&self, feedback: Feedback) -> FeedbackResult<f64> {
        let registered = {
            let mut live = self.live.write().unwrap_or_else(|p| p.into_inner());
            match live.get(&feedback.query_id) {
                Some(entry) if entry.is_alive() => {
                    Some((entry.query_type, entry.composed, entry.pattern_ids.clone()))
                }
                Some(_) => {
                    live.remove(&feedback.query_id);
                    None
                }
                None => None,
            }
        };

        let Some((query_type, composed, pattern_ids)) = registered else {
            warn!(query_id = %feedback.query_id, "Feedback for unknown query ignored");
            return Err(FeedbackError::UnknownQuery {
                query_id: feedback.query_id,
            });
        };
        if !composed {
            warn!(query_id = %feedback.query_id, "Feedback for uncomposed query ignored");
            return Err(FeedbackError::NotComposed {
                query_id: feedback.query_id,
            });
        }

        if query_type != feedback.query_type {
            debug!(
                query_id = %feedback.query_id,
                submitted = %feedback.query_type,
                registered = %query_type,
                "Feedback query type differs, using registered type"
            );
        }

        let accuracy = self.ledger.record(query_type, feedback.outcome);
        match feedback.outcome {
            Outcome::Rejected => info!(
                query_id = %feedback.query_id,
                query_type = %query_type,
                explanation = feedback.explanation.as_deref().unwrap_or(""),
                accuracy,
                "Recommendation rejected"
            ),
            outcome => info!(
                query_id = %feedback.query_id,
                query_type = %query_type,
                outcome = %outcome,
                accuracy,
                "Recommendation feedback recorded"
            ),
        }

        self.record_pattern_outcomes(&pattern_ids, feedback.outcome);

        if let Some(storage) = &self.storage {
            self.persist_feedback(storage.as_ref(), &feedback, query_type)
                .await;
        }

        Ok(accuracy)
    }

    /// Accepted and rejected outcomes count toward each cited pattern's
    /// recommendation accuracy. Modified outcomes are ambiguous and skipped.
    fn record_pattern_outcomes(&self, pattern_ids: &[String], outcome: Outcome) {
        let Some(patterns) = &self.patterns else {
            return;
        };
        let accepted = match outcome {
            Outcome::Accepted => true,
            Outcome::Rejected => false,
            Outcome::Modified => return,
        };
        for pattern_id in pattern_ids {
            if let Err(e) = patterns.record_outcome(pattern_id, accepted) {
                warn!(pattern_id = %pattern_id, error = %e, "Failed to record pattern outcome");
            }
        }
    }

    async fn persist_feedback(&self, storage: &dyn Storage, feedback: &Feedback, query_type: QueryType) {
        let record = FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            query_id: feedback.query_id.clone(),
            query_type: query_type.as_str().to_string(),
            recommended: feedback.recommended.clone(),
            outcome: feedback.outcome.as_str().to_string(),
            actual_choice: feedback.actual_choice.clone(),
            explanation: feedback.explanation.clone(),
            submitter: feedback.submitter.clone(),
            created_at: feedback.timestamp,
        };
        if let Err(e) = storage.record_feedback(&record).await {
            warn!(query_id = %feedback.query_id, error = %e, "Failed to persist feedback");
            return;
        }

        let mut content = format!(
            "Feedback: recommendation '{}' was {}.",
            feedback.recommended, feedback.outcome
        );
        if let Some(explanation) = feedback.explanation.as_deref().filter(|e| !e.is_empty()) {
            content.push(' ');
            content.push_str(explanation);
        }
        if let Some(choice) = feedback.actual_choice.as_deref().filter(|c| !c.is_empty()) {
            content.push_str(&format!(" Chose instead: {}", choice));
        }
        let memory = MemoryRecord::new(content)
            .with_tags(vec!["feedback".to_string(), query_type.as_str().to_string()]);
        if let Err(e) = storage.store_memory(&memory).await {
            warn!(query_id = %feedback.query_id, error = %e, "Failed to store feedback memory");
        }
    }

    /// Current accuracy for a query type.
    pub fn accuracy(&self, query_type: QueryType) -> f64 {
        self.ledger.get(query_type)
    }

    /// The shared ledger.
    pub fn ledger(&self) -> &Arc<AccuracyLedger> {
        &self.ledger
    }

    /// Whether a query id still belongs to a created, unreleased query.
    pub fn is_live(&self, query_id: &str) -> bool {
        self.live
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(query_id)
            .map(LiveEntry::is_alive)
            .unwrap_or(false)
    }

    /// Number of created queries not yet released or dropped.
    pub fn live_count(&self) -> usize {
        self.live
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|entry| entry.is_alive())
            .count()
    }

    /// The evidence collector.
    pub fn collector(&self) -> &EvidenceCollector {
        &self.collector
    }

    /// The confidence calculator.
    pub fn calculator(&self) -> &ConfidenceCalculator {
        &self.calculator
    }
}
