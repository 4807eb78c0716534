use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{
    Alternative, ConfidenceCalculator, EvidenceItem, QueryOptions, QueryType, SourceKind, Stance,
};
use crate::error::ComposeResult;

/// Confidence given to synthesized fallback alternatives.
pub const FALLBACK_CONFIDENCE: f64 = 0.1;

const FALLBACK_DESCRIPTIONS: &[&str] = &[
    "Manual review recommended",
    "Conservative approach: maintain current structure",
    "Experimental approach: try a new pattern",
];

/// Primary recommendation plus ranked alternatives.
#[derive(Debug, Clone)]
pub struct Ranking {
    /// Primary recommendation text. Empty when no candidate clears the threshold.
    pub recommendation: String,
    /// Overall score of the primary candidate, when there is one.
    pub primary_score: Option<f64>,
    /// Ranked alternatives, at least `required_alternatives()` long.
    pub alternatives: Vec<Alternative>,
    /// Citations of the evidence behind the primary recommendation.
    pub supporting_citations: Vec<String>,
}

struct Candidate {
    description: String,
    evidence: Vec<EvidenceItem>,
}

/// Groups evidence into competing suggestions and ranks them.
pub struct AlternativeGenerator<'a> {
    calculator: &'a ConfidenceCalculator,
}

impl<'a> AlternativeGenerator<'a> {
    /// Use `calculator` to score candidates the same way as the primary.
    pub fn new(calculator: &'a ConfidenceCalculator) -> Self {
        Self { calculator }
    }

    /// Rank candidates and pick the primary recommendation.
    pub fn generate(
        &self,
        evidence: &[EvidenceItem],
        query_text: &str,
        query_type: QueryType,
        historical_accuracy: f64,
        options: &QueryOptions,
    ) -> ComposeResult<Ranking> {
        let requested = options.sources.len();
        let candidates = group_candidates(evidence)?;

        let mut scored: Vec<(Alternative, Vec<String>)> = Vec::new();
        scored.try_reserve(candidates.len())?;
        for candidate in candidates {
            let overall = self
                .calculator
                .calculate(&candidate.evidence, query_text, historical_accuracy, requested)
                .overall;
            let citations = candidate
                .evidence
                .iter()
                .map(|item| item.citation.clone())
                .collect();
            scored.push((describe(candidate, query_type, overall), citations));
        }
        scored.sort_by(|a, b| rank(&a.0, &b.0));

        let mut recommendation = String::new();
        let mut primary_score = None;
        let mut supporting_citations = Vec::new();
        let primary_qualifies = scored
            .first()
            .map(|(a, _)| a.confidence >= options.min_confidence)
            .unwrap_or(false);

        if primary_qualifies {
            let (primary, citations) = scored.remove(0);
            recommendation = primary.description;
            primary_score = Some(primary.confidence);
            supporting_citations = citations;
        } else if scored.is_empty() && !evidence.is_empty() {
            recommendation = synthesize(query_type, evidence);
        }

        let required = options.required_alternatives();
        let cap = options.max_results.max(required);
        let mut alternatives: Vec<Alternative> = Vec::new();
        alternatives.try_reserve(cap)?;
        alternatives.extend(scored.into_iter().map(|(a, _)| a).take(cap));

        let mut n = 0;
        while alternatives.len() < required {
            let description = fallback_description(n);
            n += 1;
            if alternatives.iter().any(|a| a.description == description)
                || description == recommendation
            {
                continue;
            }
            alternatives.push(fallback(description, query_type));
        }

        Ok(Ranking {
            recommendation,
            primary_score,
            alternatives,
            supporting_citations,
        })
    }
}

/// Confidence descending, then attribution count descending, then description.
fn rank(a: &Alternative, b: &Alternative) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.attribution_count.cmp(&a.attribution_count))
        .then_with(|| a.description.cmp(&b.description))
}

fn normalize(suggestion: &str) -> String {
    suggestion
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn group_candidates(evidence: &[EvidenceItem]) -> ComposeResult<Vec<Candidate>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Candidate> = BTreeMap::new();

    for item in evidence {
        let Some(suggestion) = item.suggestion.as_deref() else {
            continue;
        };
        let key = normalize(suggestion);
        if key.is_empty() {
            continue;
        }
        let candidate = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Candidate {
                description: suggestion.trim().to_string(),
                evidence: Vec::new(),
            }
        });
        candidate.evidence.try_reserve(1)?;
        candidate.evidence.push(item.clone());
    }

    Ok(order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect())
}

fn describe(candidate: Candidate, query_type: QueryType, confidence: f64) -> Alternative {
    let mut per_kind: BTreeMap<SourceKind, usize> = BTreeMap::new();
    for item in candidate.evidence.iter().filter(|i| i.stance == Stance::Supporting) {
        *per_kind.entry(item.source).or_default() += 1;
    }

    let mut pros: Vec<String> = per_kind
        .iter()
        .map(|(kind, n)| format!("Supported by {} {} item(s)", n, kind))
        .collect();
    if let Some(best) = candidate
        .evidence
        .iter()
        .filter(|i| i.stance == Stance::Supporting)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    {
        pros.push(format!("{} ({})", best.content, best.citation));
    }

    let mut cons: Vec<String> = candidate
        .evidence
        .iter()
        .filter(|i| i.stance == Stance::Cautionary)
        .map(|i| format!("{} ({})", i.content, i.citation))
        .collect();
    if per_kind.len() < 2 {
        cons.push("Not corroborated by a second source".to_string());
    }

    Alternative {
        description: candidate.description,
        pros,
        cons,
        applicability: applicability(query_type).to_string(),
        confidence,
        attribution_count: candidate.evidence.len(),
    }
}

fn applicability(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Placement => "When the new code shares concerns with the cited location",
        QueryType::Impact => "When the change touches the cited component or its callers",
        QueryType::UserDomain => "When the intended audience matches the cited usage",
        QueryType::General => "When the surrounding context matches the cited evidence",
    }
}

/// Recommendation text used when evidence exists but names no concrete option.
fn synthesize(query_type: QueryType, evidence: &[EvidenceItem]) -> String {
    let sources: Vec<&str> = {
        let mut kinds: Vec<SourceKind> = evidence.iter().map(|e| e.source).collect();
        kinds.sort();
        kinds.dedup();
        kinds.into_iter().map(|k| k.as_str()).collect()
    };
    let basis = sources.join(", ");
    match query_type {
        QueryType::Placement => format!(
            "Based on {} evidence, place it alongside the code it is most similar to",
            basis
        ),
        QueryType::Impact => format!(
            "Based on {} evidence, review direct callers and shared state before changing it",
            basis
        ),
        QueryType::UserDomain => format!(
            "Based on {} evidence, design for the users of the closest existing feature",
            basis
        ),
        QueryType::General => format!(
            "Based on {} evidence, follow the prevailing conventions of the project",
            basis
        ),
    }
}

fn fallback_description(n: usize) -> String {
    FALLBACK_DESCRIPTIONS
        .get(n)
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            format!(
                "Alternative approach {}: gather more evidence before deciding",
                n - FALLBACK_DESCRIPTIONS.len() + 1
            )
        })
}

fn fallback(description: String, query_type: QueryType) -> Alternative {
    Alternative {
        description,
        pros: vec!["Does not depend on the collected evidence".to_string()],
        cons: vec!["Generic option with no direct supporting evidence".to_string()],
        applicability: applicability(query_type).to_string(),
        confidence: FALLBACK_CONFIDENCE,
        attribution_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{Clock, SourceSet};
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn calc() -> ConfidenceCalculator {
        ConfidenceCalculator::default().with_clock(Clock::Fixed(now()))
    }

    fn supporting(source: SourceKind, citation: &str, confidence: f64, suggestion: &str) -> EvidenceItem {
        EvidenceItem::new(source, format!("evidence at {citation}"), confidence, citation, now())
            .with_suggestion(suggestion)
    }

    #[test]
    fn test_groups_by_normalized_suggestion() {
        let evidence = vec![
            supporting(SourceKind::Memory, "src/util/log.rs", 0.8, "Place it in src/util"),
            supporting(SourceKind::Code, "src/util/log.rs:4", 0.7, "place it in  src/util"),
            supporting(SourceKind::Code, "src/core/mod.rs:1", 0.3, "Place it in src/core"),
        ];
        let calc = calc();
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "Where should the logging helper go?", QueryType::Placement, 0.5, &QueryOptions::default())
            .unwrap();

        assert_eq!(ranking.recommendation, "Place it in src/util");
        assert!(ranking.primary_score.is_some());
        assert_eq!(ranking.alternatives.len(), 1);
        assert_eq!(ranking.alternatives[0].description, "Place it in src/core");
        assert_eq!(
            ranking.supporting_citations,
            vec!["src/util/log.rs".to_string(), "src/util/log.rs:4".to_string()]
        );
    }

    #[test]
    fn test_pads_with_fallbacks_to_min_alternatives() {
        let evidence = vec![supporting(SourceKind::Code, "src/a.rs:1", 0.9, "Place it in src")];
        let calc = calc();
        let options = QueryOptions::default().with_min_alternatives(3);
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "where", QueryType::Placement, 0.5, &options)
            .unwrap();

        assert_eq!(ranking.alternatives.len(), 3);
        assert!(ranking
            .alternatives
            .iter()
            .all(|a| a.confidence == FALLBACK_CONFIDENCE));
        assert_eq!(ranking.alternatives[0].description, "Manual review recommended");
    }

    #[test]
    fn test_many_fallbacks_are_numbered() {
        let calc = calc();
        let options = QueryOptions::default().with_min_alternatives(5);
        let evidence = vec![EvidenceItem::new(SourceKind::Reasoning, "x", 0.4, "inference:1", now())];
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "q", QueryType::General, 0.5, &options)
            .unwrap();
        assert_eq!(ranking.alternatives.len(), 5);
        assert!(ranking.alternatives[4].description.starts_with("Alternative approach 2"));
    }

    #[test]
    fn test_no_candidates_synthesizes_recommendation() {
        let calc = calc();
        let evidence = vec![EvidenceItem::new(SourceKind::Reasoning, "x", 0.4, "inference:1", now())];
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "q", QueryType::Impact, 0.5, &QueryOptions::default())
            .unwrap();
        assert!(ranking.recommendation.contains("reasoning evidence"));
        assert!(ranking.primary_score.is_none());
        assert_eq!(ranking.alternatives.len(), 1);
    }

    #[test]
    fn test_below_threshold_leaves_primary_empty() {
        let calc = calc();
        let evidence = vec![
            supporting(SourceKind::Memory, "m1", 0.2, "Option A"),
            supporting(SourceKind::Memory, "m2", 0.2, "Option B"),
        ];
        let options = QueryOptions::default().with_min_confidence(0.99);
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "q", QueryType::General, 0.5, &options)
            .unwrap();
        assert!(ranking.recommendation.is_empty());
        assert_eq!(ranking.alternatives.len(), 2);
        assert!(ranking.supporting_citations.is_empty());
    }

    #[test]
    fn test_ties_break_on_attribution_count_then_description() {
        let a = Alternative {
            description: "B".into(),
            pros: vec![],
            cons: vec![],
            applicability: String::new(),
            confidence: 0.5,
            attribution_count: 1,
        };
        let mut b = a.clone();
        b.description = "A".into();
        let mut c = a.clone();
        c.attribution_count = 3;
        c.description = "Z".into();

        let mut list = vec![a, b, c];
        list.sort_by(rank);
        let order: Vec<&str> = list.iter().map(|x| x.description.as_str()).collect();
        assert_eq!(order, vec!["Z", "A", "B"]);
    }

    #[test]
    fn test_alternatives_capped_by_max_results() {
        let calc = calc();
        let evidence: Vec<EvidenceItem> = (0..8)
            .map(|i| supporting(SourceKind::Code, &format!("src/m{i}/x.rs:1"), 0.5, &format!("Place it in src/m{i}")))
            .collect();
        let options = QueryOptions::default()
            .with_sources(SourceSet::empty().with(SourceKind::Code))
            .with_max_results(2);
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "q", QueryType::Placement, 0.5, &options)
            .unwrap();
        assert_eq!(ranking.alternatives.len(), 2);
    }

    #[test]
    fn test_cautionary_evidence_becomes_cons() {
        let calc = calc();
        let evidence = vec![
            supporting(SourceKind::Code, "src/a.rs:1", 0.6, "Split the module"),
            EvidenceItem::new(SourceKind::Experience, "God Object risk", 0.6, "antipattern_1", now())
                .with_suggestion("Split the module")
                .cautionary(),
        ];
        let options = QueryOptions::default().with_min_confidence(0.99);
        let ranking = AlternativeGenerator::new(&calc)
            .generate(&evidence, "q", QueryType::General, 0.5, &options)
            .unwrap();
        let alt = &ranking.alternatives[0];
        assert!(alt.cons.iter().any(|c| c.contains("God Object")));
        assert_eq!(alt.attribution_count, 2);
    }
}
