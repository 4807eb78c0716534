use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EvidenceItem, QueryType, SourceKind, SourceSet, UnavailableSource};
use crate::error::{SourceError, SourceResult};
use crate::sources::{BreakerConfig, CircuitBreaker, EvidenceSource, SearchFilters};

/// Merged evidence of one query plus the sources that stayed silent.
#[derive(Debug, Clone, Default)]
pub struct CollectedEvidence {
    /// Evidence in canonical source order, deduplicated by citation.
    pub items: Vec<EvidenceItem>,
    /// Sources that returned (possibly with zero items).
    pub responded: Vec<SourceKind>,
    /// Sources that failed, timed out, or were skipped.
    pub unavailable: Vec<UnavailableSource>,
}

impl CollectedEvidence {
    /// True when no source produced anything.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

type SourceCall = JoinHandle<Result<SourceResult<Vec<EvidenceItem>>, tokio::time::error::Elapsed>>;

/// Fans a query out to every enabled source and merges the answers.
pub struct EvidenceCollector {
    sources: HashMap<SourceKind, Arc<dyn EvidenceSource>>,
    breakers: Mutex<HashMap<SourceKind, CircuitBreaker>>,
    breaker_config: BreakerConfig,
    source_timeout: Duration,
    max_items_per_source: usize,
}

impl EvidenceCollector {
    /// Create a collector with no sources registered.
    pub fn new(source_timeout: Duration, max_items_per_source: usize) -> Self {
        Self {
            sources: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
            breaker_config: BreakerConfig::default(),
            source_timeout,
            max_items_per_source: max_items_per_source.max(1),
        }
    }

    /// Set circuit breaker thresholds.
    pub fn with_breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Register an adapter, replacing any previous one of the same kind.
    pub fn with_source(mut self, source: Arc<dyn EvidenceSource>) -> Self {
        self.register(source);
        self
    }

    /// Register an adapter, replacing any previous one of the same kind.
    pub fn register(&mut self, source: Arc<dyn EvidenceSource>) {
        self.sources.insert(source.kind(), source);
    }

    /// Kinds that have an adapter.
    pub fn registered(&self) -> SourceSet {
        self.sources.keys().copied().collect()
    }

    /// Per-source time budget.
    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    /// Query every enabled source in parallel, each bounded by the time budget.
    pub async fn collect(
        &self,
        query_text: &str,
        query_type: QueryType,
        enabled: &SourceSet,
    ) -> CollectedEvidence {
        let filters = SearchFilters::for_query(query_text, self.max_items_per_source);
        let mut collected = CollectedEvidence::default();
        let mut calls: Vec<(SourceKind, SourceCall)> = Vec::with_capacity(enabled.len());

        for kind in enabled.iter() {
            let Some(source) = self.sources.get(&kind) else {
                collected.unavailable.push(UnavailableSource {
                    source: kind,
                    reason: "no adapter registered".to_string(),
                });
                continue;
            };

            if !self.breaker_allows(kind) {
                let err = SourceError::CircuitOpen {
                    source_kind: kind.to_string(),
                };
                warn!(source = %kind, "Skipping source with open circuit");
                collected.unavailable.push(UnavailableSource {
                    source: kind,
                    reason: err.to_string(),
                });
                continue;
            }

            let source = Arc::clone(source);
            let text = query_text.to_string();
            let filters = filters.clone();
            let budget = self.source_timeout;
            let handle = tokio::spawn(async move {
                tokio::time::timeout(budget, async move {
                    source.search(&text, query_type, &filters).await
                })
                .await
            });
            calls.push((kind, handle));
        }

        let mut per_source: Vec<Vec<EvidenceItem>> = Vec::with_capacity(calls.len());
        for (kind, handle) in calls {
            let start = Instant::now();
            let outcome = match handle.await {
                Ok(Ok(Ok(items))) => Ok(items),
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_elapsed)) => Err(SourceError::Timeout {
                    source_kind: kind.to_string(),
                    timeout_ms: self.source_timeout.as_millis() as u64,
                }),
                Err(join_error) => Err(SourceError::Unavailable {
                    source_kind: kind.to_string(),
                    message: format!("source task failed: {}", join_error),
                }),
            };

            match outcome {
                Ok(mut items) => {
                    self.record_health(kind, true);
                    items.retain(|item| item.source == kind);
                    items.truncate(self.max_items_per_source);
                    debug!(
                        source = %kind,
                        items = items.len(),
                        wait_ms = start.elapsed().as_millis(),
                        "Source responded"
                    );
                    collected.responded.push(kind);
                    per_source.push(items);
                }
                Err(e) => {
                    self.record_health(kind, false);
                    warn!(source = %kind, error = %e, "Source unavailable for query");
                    collected.unavailable.push(UnavailableSource {
                        source: kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        collected.items = merge(per_source);
        collected
    }

    fn breaker_allows(&self, kind: SourceKind) -> bool {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(kind)
            .or_insert_with(|| CircuitBreaker::new(kind, self.breaker_config.clone()))
            .allows(chrono::Utc::now())
    }

    fn record_health(&self, kind: SourceKind, ok: bool) {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        let breaker = breakers
            .entry(kind)
            .or_insert_with(|| CircuitBreaker::new(kind, self.breaker_config.clone()));
        if ok {
            breaker.record_success();
        } else {
            breaker.record_failure(chrono::Utc::now());
        }
    }
}

/// Concatenate per-source batches and drop repeated citations, first wins.
fn merge(batches: Vec<Vec<EvidenceItem>>) -> Vec<EvidenceItem> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    for item in batches.into_iter().flatten() {
        if seen.insert(item.citation.clone()) {
            merged.push(item);
        }
    }
    merged
}
