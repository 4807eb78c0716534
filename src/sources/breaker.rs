//! Per-source circuit breaker.
//!
//! A source that keeps failing or timing out is skipped for a while instead
//! of costing every query its full time budget.
//!
//! - **Closed**: calls allowed
//! - **Open**: calls skipped until the recovery timeout elapses
//! - **Half-Open**: one trial call; success closes, failure re-opens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compose::SourceKind;

/// State of a source's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls allowed.
    Closed,
    /// Calls skipped.
    Open,
    /// One trial call allowed.
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before a trial call.
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
        }
    }
}

/// Health tracker for one evidence source.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    source: SourceKind,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker for a source.
    pub fn new(source: SourceKind, config: BreakerConfig) -> Self {
        Self {
            source,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            config,
        }
    }

    /// Whether the source may be called at `now`.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and allows the call.
    pub fn allows(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = self.last_failure.map_or(true, |at| {
                    now - at >= chrono::Duration::seconds(self.config.recovery_timeout_secs as i64)
                });
                if recovered {
                    self.transition_to(CircuitState::HalfOpen);
                }
                recovered
            }
        }
    }

    /// Record a call that returned.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state != CircuitState::Closed {
            self.transition_to(CircuitState::Closed);
        }
    }

    /// Record a failed or timed-out call.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold.max(1) {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition_to(&mut self, new_state: CircuitState) {
        tracing::info!(
            source = %self.source,
            from = %self.state,
            to = %new_state,
            consecutive_failures = self.consecutive_failures,
            "Source circuit state transition"
        );
        self.state = new_state;
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures so far.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
