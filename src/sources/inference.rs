use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{keywords, location_anchor, suggest_for, EvidenceSource, PatternStore, SearchFilters};
use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::SourceResult;
use crate::langbase::{LangbaseClient, Message, PipeRequest, ReasoningConclusions};
use crate::prompts::{reasoning_request, NOUS_REASONING_PROMPT};

/// Confidence of a newly registered rule.
pub const DEFAULT_RULE_CONFIDENCE: f64 = 0.8;

/// Scale from analogy strength to inference confidence.
const ANALOGY_CONFIDENCE_SCALE: f64 = 0.7;

/// A named inference rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRule {
    /// Rule name, e.g. `modus_ponens`.
    pub name: String,
    /// Natural-language form.
    pub pattern: String,
    /// Confidence in the rule.
    pub confidence: f64,
}

impl InferenceRule {
    /// Create a rule with the default confidence.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            confidence: DEFAULT_RULE_CONFIDENCE,
        }
    }

    fn defaults() -> Vec<Self> {
        vec![
            Self::new("modus_ponens", "If A implies B, and A is true, then B is true"),
            Self::new(
                "transitive",
                "If A relates to B, and B relates to C, then A relates to C",
            ),
            Self::new("similar_context", "Similar contexts suggest similar outcomes"),
        ]
    }
}

/// One step of an inference chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceStep {
    /// Starting premise.
    pub premise: String,
    /// What follows.
    pub conclusion: String,
    /// Rule applied.
    pub rule: String,
    /// Confidence in this step.
    pub confidence: f64,
}

/// Multi-step inference toward a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceChain {
    /// What the chain concludes about.
    pub goal: String,
    /// Steps in order.
    pub steps: Vec<InferenceStep>,
    /// Product of step confidences.
    pub confidence: f64,
    /// Human-readable summary.
    pub conclusion: String,
}

impl InferenceChain {
    /// Observation, inference, conclusion.
    pub fn build(goal: &str) -> Self {
        let steps = vec![
            InferenceStep {
                premise: "Observed similar pattern in memory".to_string(),
                conclusion: "Pattern suggests solution direction".to_string(),
                rule: "similar_context".to_string(),
                confidence: 0.7,
            },
            InferenceStep {
                premise: "Pattern suggests solution direction".to_string(),
                conclusion: "Solution likely applicable here".to_string(),
                rule: "modus_ponens".to_string(),
                confidence: 0.8,
            },
            InferenceStep {
                premise: "Solution likely applicable here".to_string(),
                conclusion: goal.to_string(),
                rule: "transitive".to_string(),
                confidence: 0.75,
            },
        ];
        let confidence: f64 = steps.iter().map(|s| s.confidence).product();
        let conclusion = format!(
            "Through {}-step reasoning (confidence: {:.0}%), conclude: {}",
            steps.len(),
            confidence * 100.0,
            goal
        );
        Self {
            goal: goal.to_string(),
            steps,
            confidence,
            conclusion,
        }
    }
}

/// Structural similarity between two situations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analogy {
    /// Known situation.
    pub source_domain: String,
    /// Situation being reasoned about.
    pub target_domain: String,
    /// Shared terms.
    pub similarities: Vec<String>,
    /// Terms found on only one side.
    pub differences: Vec<String>,
    /// similarities / (similarities + differences).
    pub strength: f64,
    /// What the analogy suggests.
    pub inference: String,
    /// 0.7 × strength.
    pub inference_confidence: f64,
}

/// Compare two descriptions by their content words.
pub fn find_analogy(source_domain: &str, target_domain: &str) -> Analogy {
    let source: BTreeSet<String> = keywords(source_domain).into_iter().collect();
    let target: BTreeSet<String> = keywords(target_domain).into_iter().collect();

    let similarities: Vec<String> = source.intersection(&target).cloned().collect();
    let differences: Vec<String> = source.symmetric_difference(&target).cloned().collect();
    let total = similarities.len() + differences.len();
    let strength = if total == 0 {
        0.0
    } else {
        similarities.len() as f64 / total as f64
    };

    let inference = format!(
        "Since {} worked, and {} is similar ({:.0}% similarity), the same approach may work for {}",
        source_domain,
        target_domain,
        strength * 100.0,
        target_domain
    );

    Analogy {
        source_domain: source_domain.to_string(),
        target_domain: target_domain.to_string(),
        similarities,
        differences,
        strength,
        inference,
        inference_confidence: strength * ANALOGY_CONFIDENCE_SCALE,
    }
}

/// Logical inference over the question.
///
/// With a Langbase client configured, the reasoning pipe is asked first and
/// local rules are used only when the pipe fails.
pub struct ReasoningSource {
    rules: Vec<InferenceRule>,
    patterns: Option<Arc<PatternStore>>,
    langbase: Option<(LangbaseClient, String)>,
}

impl Default for ReasoningSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningSource {
    /// Local-only reasoning with the default rules.
    pub fn new() -> Self {
        Self {
            rules: InferenceRule::defaults(),
            patterns: None,
            langbase: None,
        }
    }

    /// Draw analogies against learned patterns.
    pub fn with_patterns(mut self, patterns: Arc<PatternStore>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Ask a Langbase pipe before falling back to local rules.
    pub fn with_langbase(mut self, client: LangbaseClient, pipe: impl Into<String>) -> Self {
        self.langbase = Some((client, pipe.into()));
        self
    }

    /// Register an additional rule.
    pub fn with_rule(mut self, rule: InferenceRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Registered rules.
    pub fn rules(&self) -> &[InferenceRule] {
        &self.rules
    }

    async fn ask_pipe(
        &self,
        client: &LangbaseClient,
        pipe: &str,
        query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> Option<Vec<EvidenceItem>> {
        let rules: Vec<String> = self
            .rules
            .iter()
            .map(|r| format!("{}: {}", r.name, r.pattern))
            .collect();
        let request = PipeRequest::new(
            pipe,
            vec![
                Message::system(NOUS_REASONING_PROMPT),
                Message::user(reasoning_request(query_text, query_type.as_str(), &rules)),
            ],
        )
        .with_variable("query_type", query_type.as_str());

        match client.call_pipe_json::<ReasoningConclusions>(request).await {
            Ok(parsed) => {
                let now = Utc::now();
                let items: Vec<EvidenceItem> = parsed
                    .conclusions
                    .into_iter()
                    .filter(|c| !c.conclusion.trim().is_empty())
                    .take(filters.max_items)
                    .enumerate()
                    .map(|(i, c)| {
                        let mut content = c.conclusion;
                        if !c.premises.is_empty() {
                            content.push_str(&format!(" (from: {})", c.premises.join("; ")));
                        }
                        let item = EvidenceItem::new(
                            SourceKind::Reasoning,
                            content,
                            c.confidence,
                            format!("langbase:{}#{}", pipe, i + 1),
                            now,
                        );
                        match c.suggestion.filter(|s| !s.trim().is_empty()) {
                            Some(suggestion) => item.with_suggestion(suggestion),
                            None => item,
                        }
                    })
                    .collect();
                debug!(pipe, conclusions = items.len(), "Reasoning pipe answered");
                Some(items)
            }
            Err(e) => {
                warn!(pipe, error = %e, "Reasoning pipe failed, using local inference");
                None
            }
        }
    }

    fn infer_locally(
        &self,
        query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> Vec<EvidenceItem> {
        if filters.keywords.is_empty() {
            return Vec::new();
        }
        let now = Utc::now();
        let mut items = Vec::new();

        let chain = InferenceChain::build(query_text.trim());
        let rule_names: Vec<&str> = chain.steps.iter().map(|s| s.rule.as_str()).collect();
        items.push(EvidenceItem::new(
            SourceKind::Reasoning,
            chain.conclusion,
            chain.confidence,
            format!("inference:{}", rule_names.join(">")),
            now,
        ));

        if let Some(patterns) = &self.patterns {
            let mut analogies: Vec<(Analogy, String, Option<String>)> = patterns
                .all()
                .into_iter()
                .map(|p| {
                    let anchor = p.examples.first().and_then(|e| location_anchor(&e.location));
                    let described = format!("{} {}", p.name, p.description);
                    (find_analogy(&described, query_text), p.id, anchor)
                })
                .filter(|(a, _, _)| a.strength > 0.0)
                .collect();
            analogies.sort_by(|a, b| {
                b.0.strength
                    .total_cmp(&a.0.strength)
                    .then_with(|| a.1.cmp(&b.1))
            });

            for (analogy, pattern_id, anchor) in analogies {
                let item = EvidenceItem::new(
                    SourceKind::Reasoning,
                    analogy.inference,
                    analogy.inference_confidence,
                    format!("analogy:{}", pattern_id),
                    now,
                );
                items.push(match anchor {
                    Some(anchor) => item.with_suggestion(suggest_for(query_type, &anchor)),
                    None => item,
                });
            }
        }

        items.truncate(filters.max_items);
        items
    }
}

#[async_trait]
impl EvidenceSource for ReasoningSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Reasoning
    }

    async fn search(
        &self,
        query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>> {
        if let Some((client, pipe)) = &self.langbase {
            if let Some(items) = self
                .ask_pipe(client, pipe, query_text, query_type, filters)
                .await
            {
                return Ok(items);
            }
        }
        Ok(self.infer_locally(query_text, query_type, filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{LearnPattern, PatternType};

    #[test]
    fn test_chain_confidence_is_product() {
        let chain = InferenceChain::build("use the shared logger");
        assert_eq!(chain.steps.len(), 3);
        assert!((chain.confidence - 0.42).abs() < 1e-9);
        assert_eq!(
            chain.conclusion,
            "Through 3-step reasoning (confidence: 42%), conclude: use the shared logger"
        );
        assert_eq!(chain.steps[2].conclusion, "use the shared logger");
    }

    #[test]
    fn test_analogy_strength() {
        let analogy = find_analogy("logging helper utilities", "logging helper placement");
        assert_eq!(analogy.similarities, vec!["helper", "logging"]);
        assert_eq!(analogy.differences.len(), 2);
        assert!((analogy.strength - 0.5).abs() < 1e-9);
        assert!((analogy.inference_confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_analogy_with_nothing_in_common() {
        let analogy = find_analogy("database pooling", "button colors");
        assert_eq!(analogy.strength, 0.0);
        assert_eq!(find_analogy("", "").strength, 0.0);
    }

    #[test]
    fn test_default_rules() {
        let source = ReasoningSource::new();
        let names: Vec<&str> = source.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["modus_ponens", "transitive", "similar_context"]);
        assert!(source
            .rules()
            .iter()
            .all(|r| r.confidence == DEFAULT_RULE_CONFIDENCE));
    }

    #[tokio::test]
    async fn test_local_inference_with_analogy() {
        let patterns = Arc::new(PatternStore::new());
        let id = patterns
            .learn(LearnPattern {
                pattern_type: PatternType::Organization,
                name: "logging helpers".to_string(),
                description: "helpers grouped by concern".to_string(),
                rationale: None,
            })
            .unwrap();
        patterns.add_example(&id, "src/util/log.rs:1", "fn log()").unwrap();

        let source = ReasoningSource::new().with_patterns(patterns);
        let text = "Where should the logging helper go?";
        let filters = SearchFilters::for_query(text, 10);
        let items = source.search(text, QueryType::Placement, &filters).await.unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].citation.starts_with("inference:"));
        assert_eq!(items[1].citation, format!("analogy:{}", id));
        assert_eq!(items[1].suggestion.as_deref(), Some("Place it in src/util"));
    }

    #[tokio::test]
    async fn test_no_keywords_no_inference() {
        let source = ReasoningSource::new();
        let filters = SearchFilters::for_query("where?", 10);
        let items = source.search("where?", QueryType::General, &filters).await.unwrap();
        assert!(items.is_empty());
    }
}
