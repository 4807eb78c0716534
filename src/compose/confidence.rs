//! Five-factor confidence model.
//!
//! | factor               | rises with                                    |
//! |----------------------|-----------------------------------------------|
//! | source_agreement     | closer per-source means, more sources heard   |
//! | evidence_quality     | more items, more specific citations           |
//! | historical_accuracy  | accepted feedback for the query type          |
//! | query_complexity     | longer, more ambiguous questions (inverted)   |
//! | temporal_recency     | fresher evidence                              |
//!
//! The overall score is `Σ weightᵢ · factorᵢ`, except that complexity enters
//! as `1 - query_complexity`, clamped to [0, 1].

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::clamp_unit;
use super::{ConfidenceBreakdown, EvidenceItem, SourceKind};
use crate::error::{ComposeError, ComposeResult};

/// Agreement reported when only one source kind produced evidence.
pub const SINGLE_SOURCE_AGREEMENT: f64 = 0.5;

/// Age at which an evidence item counts half.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 90.0;

/// Largest possible variance of values in [0, 1].
const MAX_VARIANCE: f64 = 0.25;

/// Items needed to reach ~63% of the volume term.
const QUALITY_VOLUME_SCALE: f64 = 5.0;

/// Word count at which length complexity saturates.
const COMPLEXITY_WORD_CAP: f64 = 30.0;

/// Ambiguity markers at which marker complexity saturates.
const COMPLEXITY_MARKER_CAP: f64 = 3.0;

const AMBIGUITY_MARKERS: &[&str] = &[
    "or", "maybe", "perhaps", "either", "might", "could", "possibly", "somehow", "various",
    "several", "some", "etc", "whatever", "unclear", "depends",
];

// ============================================================================
// Weights
// ============================================================================

/// Normalized factor weights. Always non-negative and summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    /// Weight of source_agreement.
    pub source_agreement: f64,
    /// Weight of evidence_quality.
    pub evidence_quality: f64,
    /// Weight of historical_accuracy.
    pub historical_accuracy: f64,
    /// Weight of query_complexity.
    pub query_complexity: f64,
    /// Weight of temporal_recency.
    pub temporal_recency: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            source_agreement: 0.25,
            evidence_quality: 0.25,
            historical_accuracy: 0.20,
            query_complexity: 0.15,
            temporal_recency: 0.15,
        }
    }
}

impl FactorWeights {
    /// Build weights from raw values in factor order, normalizing to sum 1.0.
    pub fn new(raw: [f64; 5]) -> ComposeResult<Self> {
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ComposeError::invalid(
                "weights",
                "weights must be finite and non-negative",
            ));
        }
        let sum: f64 = raw.iter().sum();
        if sum <= f64::EPSILON {
            return Err(ComposeError::invalid("weights", "weights must not sum to zero"));
        }
        Ok(Self {
            source_agreement: raw[0] / sum,
            evidence_quality: raw[1] / sum,
            historical_accuracy: raw[2] / sum,
            query_complexity: raw[3] / sum,
            temporal_recency: raw[4] / sum,
        })
    }

    /// Weights in factor order.
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.source_agreement,
            self.evidence_quality,
            self.historical_accuracy,
            self.query_complexity,
            self.temporal_recency,
        ]
    }

    /// Sum of all weights.
    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Time source for recency. Fixed clocks make compositions reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    /// Wall clock.
    #[default]
    System,
    /// Always returns the given instant.
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Current time according to this clock.
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

// ============================================================================
// Calculator
// ============================================================================

/// Reduces evidence plus ledger state into a [`ConfidenceBreakdown`].
#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator {
    weights: FactorWeights,
    clock: Clock,
}

impl ConfidenceCalculator {
    /// Create a calculator with the given weights.
    pub fn new(weights: FactorWeights) -> Self {
        Self {
            weights,
            clock: Clock::System,
        }
    }

    /// Use a specific clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Weights in use.
    pub fn weights(&self) -> &FactorWeights {
        &self.weights
    }

    /// Clock in use.
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Score `evidence` for a question.
    ///
    /// `requested_sources` is the number of enabled source kinds; sources
    /// that stayed silent lower agreement and quality through coverage.
    pub fn calculate(
        &self,
        evidence: &[EvidenceItem],
        query_text: &str,
        historical_accuracy: f64,
        requested_sources: usize,
    ) -> ConfidenceBreakdown {
        let agreement = source_agreement(evidence, requested_sources);
        let quality = evidence_quality(evidence, requested_sources);
        let historical = clamp_unit(historical_accuracy);
        let complexity = query_complexity(query_text);
        let recency = temporal_recency(evidence, self.clock.now());

        let w = self.weights;
        let contributions = [
            ("source_agreement", agreement, w.source_agreement, agreement * w.source_agreement),
            ("evidence_quality", quality, w.evidence_quality, quality * w.evidence_quality),
            (
                "historical_accuracy",
                historical,
                w.historical_accuracy,
                historical * w.historical_accuracy,
            ),
            (
                "query_complexity",
                complexity,
                w.query_complexity,
                (1.0 - complexity) * w.query_complexity,
            ),
            ("temporal_recency", recency, w.temporal_recency, recency * w.temporal_recency),
        ];

        let overall = clamp_unit(contributions.iter().map(|c| c.3).sum());

        let mut explanation = String::new();
        for (name, value, weight, contribution) in contributions {
            let _ = write!(
                explanation,
                "{name}: value={value:.3} weight={weight:.3} contribution={contribution:.3}"
            );
            if name == "query_complexity" {
                explanation.push_str(" (inverted)");
            }
            explanation.push_str("; ");
        }
        let _ = write!(explanation, "overall={overall:.3}");

        ConfidenceBreakdown {
            source_agreement: agreement,
            evidence_quality: quality,
            historical_accuracy: historical,
            query_complexity: complexity,
            temporal_recency: recency,
            weights: w,
            overall,
            explanation,
        }
    }
}

// ============================================================================
// Factors
// ============================================================================

fn per_kind_means(evidence: &[EvidenceItem]) -> BTreeMap<SourceKind, f64> {
    let mut sums: BTreeMap<SourceKind, (f64, usize)> = BTreeMap::new();
    for item in evidence {
        let entry = sums.entry(item.source).or_insert((0.0, 0));
        entry.0 += item.confidence;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(kind, (sum, n))| (kind, sum / n as f64))
        .collect()
}

fn coverage(kinds: usize, requested_sources: usize) -> f64 {
    let requested = requested_sources.max(kinds).max(1);
    kinds as f64 / requested as f64
}

/// 1 minus the normalized variance of per-source mean confidences, scaled
/// by how many of the requested sources responded.
///
/// One source alone yields [`SINGLE_SOURCE_AGREEMENT`]; no evidence yields 0.
pub fn source_agreement(evidence: &[EvidenceItem], requested_sources: usize) -> f64 {
    let means = per_kind_means(evidence);
    match means.len() {
        0 => 0.0,
        1 => SINGLE_SOURCE_AGREEMENT,
        n => {
            let values: Vec<f64> = means.values().copied().collect();
            let mean = values.iter().sum::<f64>() / n as f64;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            let agreement = 1.0 - (variance / MAX_VARIANCE).min(1.0);
            clamp_unit(agreement * (0.5 + 0.5 * coverage(n, requested_sources)))
        }
    }
}

/// Specificity of a citation string.
///
/// `path:line` scores 1.0, a bare file path 0.7, anything else 0.4.
pub fn citation_specificity(citation: &str) -> f64 {
    let citation = citation.trim();
    let looks_like_path = |s: &str| {
        s.contains('/')
            || s.contains('\\')
            || s.rsplit_once('.')
                .map(|(stem, ext)| {
                    !stem.is_empty()
                        && !ext.is_empty()
                        && ext.len() <= 5
                        && ext.chars().all(|c| c.is_ascii_alphanumeric())
                })
                .unwrap_or(false)
    };

    if let Some((path, line)) = citation.rsplit_once(':') {
        if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) && looks_like_path(path) {
            return 1.0;
        }
    }
    if !citation.contains(':') && looks_like_path(citation) {
        return 0.7;
    }
    0.4
}

/// Saturating volume term times mean citation specificity, scaled by coverage.
pub fn evidence_quality(evidence: &[EvidenceItem], requested_sources: usize) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    let n = evidence.len() as f64;
    let volume = 1.0 - (-n / QUALITY_VOLUME_SCALE).exp();
    let specificity =
        evidence.iter().map(|e| citation_specificity(&e.citation)).sum::<f64>() / n;
    let kinds = per_kind_means(evidence).len();
    clamp_unit(volume * (0.4 + 0.6 * specificity) * (0.7 + 0.3 * coverage(kinds, requested_sources)))
}

/// Length and ambiguity of the question, in [0, 1].
pub fn query_complexity(query_text: &str) -> f64 {
    let words: Vec<String> = query_text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let markers = words
        .iter()
        .filter(|w| AMBIGUITY_MARKERS.contains(&w.as_str()))
        .count()
        + query_text.matches('?').count().saturating_sub(1)
        + query_text.matches("and/or").count();

    let length = (words.len() as f64 / COMPLEXITY_WORD_CAP).min(1.0);
    let ambiguity = (markers as f64 / COMPLEXITY_MARKER_CAP).min(1.0);
    clamp_unit(0.6 * length + 0.4 * ambiguity)
}

/// Mean of `0.5^(age_days / 90)` over all items. Future timestamps count as now.
pub fn temporal_recency(evidence: &[EvidenceItem], now: DateTime<Utc>) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    let total: f64 = evidence
        .iter()
        .map(|e| {
            let age_days = ((now - e.timestamp).num_seconds() as f64 / 86_400.0).max(0.0);
            0.5_f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
        })
        .sum();
    clamp_unit(total / evidence.len() as f64)
}
