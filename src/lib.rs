//! # MCP Nous Compose
//!
//! A Model Context Protocol (MCP) server that answers a coding assistant's
//! placement, impact, and user-domain questions by composing evidence from
//! several sources into one recommendation with a calibrated confidence.
//!
//! ## Features
//!
//! - **Evidence collection**: memories, a static scan of the project tree,
//!   learned patterns, logical inference, and cross-project experience,
//!   queried in parallel with per-source timeouts and circuit breakers
//! - **Five-factor confidence**: source agreement, evidence quality,
//!   historical accuracy, query complexity, and temporal recency
//! - **Alternatives**: ranked competing recommendations with pros and cons
//! - **Reasoning trace**: one cited step per contributing source
//! - **Impact analysis**: a dependency graph and change history that turn
//!   "what breaks?" questions into severity and risk estimates
//! - **Feedback**: accepted/rejected/modified outcomes calibrate future
//!   confidence through a per-type accuracy ledger and the cited patterns
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → ComposeEngine → EvidenceSources
//!                    ↓                                  ↓
//!              SQLite (memories, feedback, log)   Langbase Pipe (optional)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_nous_compose::{AppState, Config, McpServer};
//! use mcp_nous_compose::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage)?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Composition engine: queries, evidence collection, confidence, alternatives.
pub mod compose;
/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Best practices and anti-patterns behind EXPERIENCE evidence.
pub mod knowledge;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// Evidence source adapters.
pub mod sources;
/// SQLite storage layer for persistence.
pub mod storage;

pub use compose::{ComposeEngine, CompositionResult, Feedback, Outcome, QueryType};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
