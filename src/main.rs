use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_nous_compose::{
    compose::{QueryOptions, QueryType, SourceSet},
    config::{Config, LogFormat},
    server::{render_text, AppState, McpServer},
    storage::{MemoryRecord, SqliteStorage, Storage},
};

#[derive(Parser, Debug)]
#[command(
    name = "mcp-nous-compose",
    version,
    about = "Composed placement, impact, and user-domain recommendations"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Compose one recommendation and print it
    Query {
        /// placement, impact, user_domain, or general
        #[arg(value_parser = parse_query_type)]
        query_type: QueryType,
        /// The question
        text: String,
        /// Comma-separated evidence sources (default: all)
        #[arg(long, value_parser = parse_sources)]
        sources: Option<SourceSet>,
        /// Print the full result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Store a memory for later queries
    Remember {
        /// What to remember
        content: String,
        /// Path the memory is about
        #[arg(long)]
        location: Option<String>,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Show recent compositions
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn parse_query_type(raw: &str) -> Result<QueryType, String> {
    raw.parse()
}

fn parse_sources(raw: &str) -> Result<SourceSet, String> {
    SourceSet::parse_list(raw)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, storage).await,
        Commands::Query {
            query_type,
            text,
            sources,
            json,
        } => query(config, storage, query_type, &text, sources, json).await,
        Commands::Remember {
            content,
            location,
            tags,
        } => remember(&storage, content, location, tags).await,
        Commands::History { limit } => history(&storage, limit).await,
    }
}

async fn serve(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Nous Compose Server starting..."
    );

    let state = Arc::new(AppState::new(config, storage)?);
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn query(
    config: Config,
    storage: SqliteStorage,
    query_type: QueryType,
    text: &str,
    sources: Option<SourceSet>,
    json: bool,
) -> anyhow::Result<()> {
    let state = AppState::new(config, storage)?;
    let mut options = QueryOptions::default();
    if let Some(sources) = sources {
        options.sources = sources;
    }

    let (query_id, result) = match state.compose(text, query_type, options).await {
        Ok(composed) => composed,
        Err(e) => anyhow::bail!("{}\nSuggestion: {}", e, e.suggestion()),
    };

    if json {
        let body = serde_json::json!({
            "query_id": query_id,
            "query_type": query_type,
            "result": result,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", render_text(&query_id, query_type, &result));
    }
    Ok(())
}

async fn remember(
    storage: &SqliteStorage,
    content: String,
    location: Option<String>,
    tags: Vec<String>,
) -> anyhow::Result<()> {
    if content.trim().is_empty() {
        anyhow::bail!("Memory content must not be empty");
    }
    let tags = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let mut memory = MemoryRecord::new(content.trim()).with_tags(tags);
    if let Some(location) = location {
        memory = memory.with_location(location);
    }
    storage.store_memory(&memory).await?;
    println!("{}", memory.id);
    Ok(())
}

async fn history(storage: &SqliteStorage, limit: usize) -> anyhow::Result<()> {
    for entry in storage.recent_compositions(limit).await? {
        let outcome = if entry.success {
            format!(
                "{} ({}%)",
                entry.recommendation.as_deref().unwrap_or("-"),
                (entry.confidence.unwrap_or_default() * 100.0).round()
            )
        } else {
            format!("FAILED: {}", entry.error.as_deref().unwrap_or("unknown"))
        };
        println!(
            "{}  {:<11}  {}  {}  ->  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.query_type,
            entry.query_id,
            entry.query_text,
            outcome
        );
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
