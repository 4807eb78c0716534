use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::info;

use super::SharedState;
use crate::compose::{
    CompositionResult, Feedback, Outcome, QueryOptions, QueryType, SourceKind, SourceSet,
};
use crate::error::{McpError, McpResult};
use crate::knowledge::{NewAntiPattern, NewPractice};
use crate::sources::{DependencyType, LearnPattern, PatternType, RecordChange};
use crate::storage::{MemoryRecord, Storage};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");
    let start = Instant::now();

    let result = match tool_name {
        "nous_placement" => handle_typed_query(state, tool_name, QueryType::Placement, arguments).await,
        "nous_impact" => handle_typed_query(state, tool_name, QueryType::Impact, arguments).await,
        "nous_user_domain" => {
            handle_typed_query(state, tool_name, QueryType::UserDomain, arguments).await
        }
        "nous_compose" => handle_compose(state, arguments).await,
        "nous_feedback" => handle_feedback(state, arguments).await,
        "nous_accuracy" => handle_accuracy(state, arguments).await,
        "nous_remember" => handle_remember(state, arguments).await,
        "nous_add_practice" => handle_add_practice(state, arguments).await,
        "nous_add_antipattern" => handle_add_antipattern(state, arguments).await,
        "nous_learn_pattern" => handle_learn_pattern(state, arguments).await,
        "nous_import_project" => handle_import_project(state, arguments).await,
        "nous_add_dependency" => handle_add_dependency(state, arguments).await,
        "nous_record_change" => handle_record_change(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    };

    info!(
        tool = %tool_name,
        success = result.is_ok(),
        latency_ms = start.elapsed().as_millis(),
        "Tool call finished"
    );
    result
}

// ============================================================================
// Composition tools
// ============================================================================

#[derive(Debug, Deserialize)]
struct QueryParams {
    query: String,
}

/// Handle nous_placement, nous_impact and nous_user_domain.
///
/// Returns a human-readable string rather than JSON.
async fn handle_typed_query(
    state: &SharedState,
    tool_name: &str,
    query_type: QueryType,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: QueryParams = parse_arguments(tool_name, arguments)?;
    let (query_id, result) = state
        .compose(&params.query, query_type, QueryOptions::default())
        .await?;
    Ok(Value::String(render_text(&query_id, query_type, &result)))
}

/// Render a result as "<recommendation>\n\nConfidence: NN%" plus the query id
/// and alternatives.
pub fn render_text(query_id: &str, query_type: QueryType, result: &CompositionResult) -> String {
    let mut text = if result.recommendation.is_empty() {
        format!(
            "No strong single {} recommendation",
            query_type.as_str().replace('_', " ")
        )
    } else {
        result.recommendation.clone()
    };

    text.push_str(&format!(
        "\n\nConfidence: {}%\nQuery ID: {}",
        percent(result.confidence.overall),
        query_id
    ));

    if !result.alternatives.is_empty() {
        text.push_str("\n\nAlternatives:");
        for (i, alternative) in result.alternatives.iter().enumerate() {
            text.push_str(&format!(
                "\n{}. {} ({}%)",
                i + 1,
                alternative.description,
                percent(alternative.confidence)
            ));
        }
    }
    text
}

fn percent(value: f64) -> u32 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u32
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ComposeParams {
    query: String,
    #[serde(default)]
    query_type: Option<String>,
    #[serde(default)]
    sources: Option<Vec<String>>,
    #[serde(default)]
    min_alternatives: Option<usize>,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    min_confidence: Option<f64>,
    #[serde(default = "default_true")]
    show_reasoning: bool,
    #[serde(default = "default_true")]
    show_alternatives: bool,
}

impl ComposeParams {
    fn options(&self) -> McpResult<QueryOptions> {
        let mut options = QueryOptions {
            show_reasoning: self.show_reasoning,
            show_alternatives: self.show_alternatives,
            ..QueryOptions::default()
        };
        if let Some(names) = &self.sources {
            options.sources = names
                .iter()
                .map(|name| name.parse::<SourceKind>())
                .collect::<Result<SourceSet, _>>()
                .map_err(|message| invalid("nous_compose", message))?;
        }
        if let Some(min_alternatives) = self.min_alternatives {
            options.min_alternatives = min_alternatives;
        }
        if let Some(max_results) = self.max_results {
            options.max_results = max_results;
        }
        if let Some(min_confidence) = self.min_confidence {
            options.min_confidence = min_confidence;
        }
        Ok(options)
    }
}

/// Handle nous_compose: full result as JSON, trimmed by the display flags.
async fn handle_compose(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ComposeParams = parse_arguments("nous_compose", arguments)?;
    let query_type = parse_query_type("nous_compose", params.query_type.as_deref())?;
    let options = params.options()?;

    let (query_id, result) = state.compose(&params.query, query_type, options).await?;

    let mut body = json!({
        "query_id": query_id,
        "query_type": query_type,
        "recommendation": result.recommendation,
        "confidence": result.confidence,
        "evidence_count": result.evidence_count,
        "unavailable_sources": result.unavailable_sources,
    });
    if params.show_reasoning {
        body["reasoning"] = serde_json::to_value(&result.reasoning)?;
        body["sources"] = serde_json::to_value(&result.sources)?;
    }
    if params.show_alternatives {
        body["alternatives"] = serde_json::to_value(&result.alternatives)?;
    }
    Ok(body)
}

// ============================================================================
// Feedback and accuracy
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeedbackParams {
    query_id: String,
    outcome: String,
    #[serde(default)]
    query_type: Option<String>,
    #[serde(default)]
    recommended: Option<String>,
    #[serde(default)]
    actual_choice: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    submitter: Option<String>,
}

/// Handle nous_feedback.
async fn handle_feedback(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: FeedbackParams = parse_arguments("nous_feedback", arguments)?;
    let outcome: Outcome = params
        .outcome
        .parse()
        .map_err(|message| invalid("nous_feedback", message))?;
    let query_type = parse_query_type("nous_feedback", params.query_type.as_deref())?;

    let recommended = params
        .recommended
        .or_else(|| state.retained_recommendation(&params.query_id))
        .unwrap_or_default();

    let mut feedback =
        Feedback::new(params.query_id.clone(), query_type, outcome).with_recommended(recommended);
    if let Some(choice) = params.actual_choice {
        feedback = feedback.with_actual_choice(choice);
    }
    if let Some(explanation) = params.explanation {
        feedback = feedback.with_explanation(explanation);
    }
    if let Some(submitter) = params.submitter {
        feedback = feedback.with_submitter(submitter);
    }

    let accuracy = state.engine.submit_feedback(feedback).await?;
    Ok(json!({
        "query_id": params.query_id,
        "outcome": outcome,
        "accuracy": accuracy,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct AccuracyParams {
    #[serde(default)]
    query_type: Option<String>,
}

/// Handle nous_accuracy: one type, or the whole ledger.
async fn handle_accuracy(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AccuracyParams = match arguments {
        Some(args) => parse_arguments("nous_accuracy", Some(args))?,
        None => AccuracyParams::default(),
    };

    match params.query_type.as_deref() {
        Some(raw) => {
            let query_type = parse_query_type("nous_accuracy", Some(raw))?;
            Ok(json!({
                "query_type": query_type,
                "accuracy": state.engine.accuracy(query_type),
            }))
        }
        None => {
            let snapshot: serde_json::Map<String, Value> = state
                .engine
                .ledger()
                .snapshot()
                .into_iter()
                .map(|(query_type, accuracy)| (query_type.as_str().to_string(), json!(accuracy)))
                .collect();
            Ok(json!({ "accuracy": snapshot }))
        }
    }
}

// ============================================================================
// Knowledge tools
// ============================================================================

#[derive(Debug, Deserialize)]
struct RememberParams {
    content: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Handle nous_remember: store a memory for MEMORY evidence.
async fn handle_remember(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RememberParams = parse_arguments("nous_remember", arguments)?;
    if params.content.trim().is_empty() {
        return Err(invalid("nous_remember", "content must not be empty"));
    }

    let mut memory = MemoryRecord::new(params.content.trim()).with_tags(params.tags);
    if let Some(location) = params.location.filter(|l| !l.trim().is_empty()) {
        memory = memory.with_location(location);
    }
    state.storage.store_memory(&memory).await?;

    Ok(json!({ "memory_id": memory.id }))
}

/// Handle nous_add_practice.
async fn handle_add_practice(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: NewPractice = parse_arguments("nous_add_practice", arguments)?;
    let practice_id = state.knowledge.add_practice(params)?;
    Ok(json!({ "practice_id": practice_id }))
}

/// Handle nous_add_antipattern.
async fn handle_add_antipattern(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: NewAntiPattern = parse_arguments("nous_add_antipattern", arguments)?;
    let antipattern_id = state.knowledge.add_antipattern(params)?;
    Ok(json!({ "antipattern_id": antipattern_id }))
}

#[derive(Debug, Deserialize)]
struct ExampleParams {
    location: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ExceptionParams {
    location: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    justified: bool,
}

#[derive(Debug, Deserialize)]
struct LearnPatternParams {
    #[serde(rename = "type")]
    pattern_type: PatternType,
    name: String,
    description: String,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    examples: Vec<ExampleParams>,
    #[serde(default)]
    exceptions: Vec<ExceptionParams>,
}

/// Handle nous_learn_pattern.
async fn handle_learn_pattern(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: LearnPatternParams = parse_arguments("nous_learn_pattern", arguments)?;

    let pattern_id = state.patterns.learn(LearnPattern {
        pattern_type: params.pattern_type,
        name: params.name,
        description: params.description,
        rationale: params.rationale,
    })?;
    for example in &params.examples {
        state
            .patterns
            .add_example(&pattern_id, &example.location, &example.snippet)?;
    }
    for exception in &params.exceptions {
        state.patterns.add_exception(
            &pattern_id,
            &exception.location,
            &exception.snippet,
            exception.reason.as_deref(),
            exception.justified,
        )?;
    }

    let confidence = state
        .patterns
        .get(&pattern_id)
        .map(|p| p.confidence)
        .unwrap_or_default();
    Ok(json!({
        "pattern_id": pattern_id,
        "confidence": confidence,
    }))
}

#[derive(Debug, Deserialize)]
struct ImportProjectParams {
    name: String,
    domain: String,
    quality: f64,
}

/// Handle nous_import_project: derive a practice from a successful project.
async fn handle_import_project(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ImportProjectParams = parse_arguments("nous_import_project", arguments)?;
    let practice_id = state
        .knowledge
        .import_project(&params.name, &params.domain, params.quality)?;
    Ok(json!({ "practice_id": practice_id }))
}

fn default_strength() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct AddDependencyParams {
    source: String,
    target: String,
    #[serde(rename = "type")]
    dependency_type: DependencyType,
    #[serde(default = "default_strength")]
    strength: f64,
}

/// Handle nous_add_dependency. Returns the target's updated prediction.
async fn handle_add_dependency(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AddDependencyParams = parse_arguments("nous_add_dependency", arguments)?;
    state.impact.add_dependency(
        &params.source,
        &params.target,
        params.dependency_type,
        params.strength,
    )?;

    let prediction = state.impact.predict(params.target.trim());
    Ok(json!({
        "target": prediction.target,
        "dependents": prediction.affected.len(),
        "severity": prediction.severity,
        "risk": prediction.risk,
    }))
}

/// Handle nous_record_change.
async fn handle_record_change(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RecordChange = parse_arguments("nous_record_change", arguments)?;
    let change_id = state.impact.record_change(params)?;
    let actual_impact = state
        .impact
        .changes()
        .iter()
        .find(|c| c.id == change_id)
        .map(|c| c.actual_impact)
        .unwrap_or_default();
    Ok(json!({
        "change_id": change_id,
        "actual_impact": actual_impact,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

fn parse_query_type(tool_name: &str, raw: Option<&str>) -> McpResult<QueryType> {
    match raw {
        Some(raw) => raw.parse().map_err(|message| invalid(tool_name, message)),
        None => Ok(QueryType::General),
    }
}

fn invalid(tool_name: &str, message: impl Into<String>) -> McpError {
    McpError::InvalidParameters {
        tool_name: tool_name.to_string(),
        message: message.into(),
    }
}
