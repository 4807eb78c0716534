//! Per-query-type accuracy statistics.
//!
//! Each query type holds an exponential moving average of feedback outcomes,
//! stored as `f64` bits in an [`AtomicU64`]. Reads are a single atomic load.
//! Writes go through a compare-and-swap loop so concurrent feedback for the
//! same type never loses an update.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::{Outcome, QueryType};

/// Value every entry starts at before any feedback.
pub const LEDGER_BASELINE: f64 = 0.5;

/// Default EMA smoothing constant.
pub const DEFAULT_EMA_ALPHA: f64 = 0.2;

/// Accuracy ledger shared by all queries of an engine.
#[derive(Debug)]
pub struct AccuracyLedger {
    entries: [AtomicU64; 4],
    alpha: f64,
}

impl AccuracyLedger {
    /// Create a ledger with the given smoothing constant.
    ///
    /// Values outside (0, 1] fall back to [`DEFAULT_EMA_ALPHA`].
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 && alpha <= 1.0 {
            alpha
        } else {
            DEFAULT_EMA_ALPHA
        };
        let seed = LEDGER_BASELINE.to_bits();
        Self {
            entries: [
                AtomicU64::new(seed),
                AtomicU64::new(seed),
                AtomicU64::new(seed),
                AtomicU64::new(seed),
            ],
            alpha,
        }
    }

    /// Smoothing constant in use.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Current accuracy for a query type.
    pub fn get(&self, query_type: QueryType) -> f64 {
        f64::from_bits(self.entries[query_type.index()].load(Ordering::Acquire))
    }

    /// Fold one outcome into the statistic and return the new value.
    pub fn record(&self, query_type: QueryType, outcome: Outcome) -> f64 {
        let target = outcome.target();
        let alpha = self.alpha;
        let entry = &self.entries[query_type.index()];

        let previous = entry
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let old = f64::from_bits(bits);
                Some(ema(old, target, alpha).to_bits())
            })
            .unwrap_or_else(|bits| bits);

        let old = f64::from_bits(previous);
        let new = ema(old, target, alpha);

        debug!(
            query_type = %query_type,
            outcome = %outcome,
            previous = old,
            accuracy = new,
            "Accuracy ledger updated"
        );

        new
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<QueryType, f64> {
        QueryType::ALL
            .into_iter()
            .map(|qt| (qt, self.get(qt)))
            .collect()
    }
}

impl Default for AccuracyLedger {
    fn default() -> Self {
        Self::new(DEFAULT_EMA_ALPHA)
    }
}

fn ema(old: f64, target: f64, alpha: f64) -> f64 {
    (alpha * target + (1.0 - alpha) * old).clamp(0.0, 1.0)
}
