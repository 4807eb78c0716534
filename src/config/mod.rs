use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::compose::{FactorWeights, DEFAULT_EMA_ALPHA};
use crate::error::AppError;
use crate::sources::BreakerConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Langbase access; `None` keeps inference local.
    pub langbase: Option<LangbaseConfig>,
    /// SQLite settings.
    pub database: DatabaseConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
    /// HTTP timeouts and retries.
    pub request: RequestConfig,
    /// Langbase pipe names.
    pub pipes: PipeConfig,
    /// Composition engine tuning.
    pub compose: ComposeConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    /// API key.
    pub api_key: String,
    /// API root.
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay, doubled per retry.
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe behind REASONING evidence.
    pub reasoning: String,
}

/// Composition engine configuration
#[derive(Debug, Clone)]
pub struct ComposeConfig {
    /// Time budget of each evidence source call.
    pub source_timeout_ms: u64,
    /// Evidence items kept per source.
    pub max_items_per_source: usize,
    /// Smoothing constant of the accuracy ledger.
    pub ema_alpha: f64,
    /// Confidence factor weights.
    pub weights: FactorWeights,
    /// Source circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Composed queries kept for later feedback.
    pub retained_queries: usize,
    /// Root of the CODE source scan.
    pub project_root: PathBuf,
}

impl ComposeConfig {
    /// Source time budget as a duration.
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse five comma-separated weights.
pub fn parse_weights(raw: &str) -> Result<FactorWeights, AppError> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| AppError::Config {
            message: format!("NOUS_WEIGHTS must be five numbers: {}", e),
        })?;
    let raw: [f64; 5] = values.try_into().map_err(|v: Vec<f64>| AppError::Config {
        message: format!("NOUS_WEIGHTS needs 5 values, got {}", v.len()),
    })?;
    FactorWeights::new(raw).map_err(|e| AppError::Config {
        message: format!("NOUS_WEIGHTS rejected: {}", e),
    })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = env::var("LANGBASE_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|api_key| LangbaseConfig {
                api_key,
                base_url: env::var("LANGBASE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
            });

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/nous.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            reasoning: env::var("PIPE_REASONING")
                .unwrap_or_else(|_| "nous-reasoning-v1".to_string()),
        };

        let weights = match env::var("NOUS_WEIGHTS") {
            Ok(raw) if !raw.trim().is_empty() => parse_weights(&raw)?,
            _ => FactorWeights::default(),
        };
        let defaults = BreakerConfig::default();
        let compose = ComposeConfig {
            source_timeout_ms: env_or("NOUS_SOURCE_TIMEOUT_MS", 2000),
            max_items_per_source: env_or("NOUS_MAX_ITEMS_PER_SOURCE", 10),
            ema_alpha: env_or("NOUS_EMA_ALPHA", DEFAULT_EMA_ALPHA),
            weights,
            breaker: BreakerConfig {
                failure_threshold: env_or("NOUS_BREAKER_THRESHOLD", defaults.failure_threshold),
                recovery_timeout_secs: env_or(
                    "NOUS_BREAKER_RECOVERY_SECS",
                    defaults.recovery_timeout_secs,
                ),
            },
            retained_queries: env_or("NOUS_RETAINED_QUERIES", 256),
            project_root: PathBuf::from(
                env::var("NOUS_PROJECT_ROOT").unwrap_or_else(|_| ".".to_string()),
            ),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            compose,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: 2000,
            max_items_per_source: 10,
            ema_alpha: DEFAULT_EMA_ALPHA,
            weights: FactorWeights::default(),
            breaker: BreakerConfig::default(),
            retained_queries: 256,
            project_root: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weights_normalizes() {
        let weights = parse_weights("1, 1, 1, 1, 1").unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!((weights.source_agreement - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_weights_rejects_malformed() {
        assert!(matches!(parse_weights("0.5,0.5"), Err(AppError::Config { .. })));
        assert!(matches!(parse_weights("a,b,c,d,e"), Err(AppError::Config { .. })));
        assert!(matches!(parse_weights("0,0,0,0,0"), Err(AppError::Config { .. })));
        assert!(matches!(parse_weights("1,1,1,1,-1"), Err(AppError::Config { .. })));
    }

    #[test]
    fn test_compose_defaults() {
        let config = ComposeConfig::default();
        assert_eq!(config.source_timeout(), Duration::from_millis(2000));
        assert_eq!(config.retained_queries, 256);
        assert_eq!(config.breaker.failure_threshold, 3);
    }
}
