use super::{EvidenceItem, ReasoningStep, SourceAttribution, SourceKind};
use crate::error::ComposeResult;

/// Citation trail of one composition.
#[derive(Debug, Clone, Default)]
pub struct ReasoningTrace {
    /// One step per contributing source kind, canonical order.
    pub steps: Vec<ReasoningStep>,
    /// All attributions, flattened in step order. Contributions sum to 1.0.
    pub attributions: Vec<SourceAttribution>,
}

/// Build the reasoning trail for merged evidence.
///
/// Each evidence item becomes one attribution whose contribution is its
/// share of total item confidence (uniform when every item has zero
/// confidence). A step's contribution is the sum over its attributions.
pub fn build_trace(evidence: &[EvidenceItem]) -> ComposeResult<ReasoningTrace> {
    let mut trace = ReasoningTrace::default();
    if evidence.is_empty() {
        return Ok(trace);
    }

    let total: f64 = evidence.iter().map(|e| e.confidence).sum();
    let uniform = 1.0 / evidence.len() as f64;
    let share = |item: &EvidenceItem| {
        if total > 0.0 {
            item.confidence / total
        } else {
            uniform
        }
    };

    trace.steps.try_reserve(SourceKind::ALL.len())?;
    trace.attributions.try_reserve(evidence.len())?;

    for kind in SourceKind::ALL {
        let items: Vec<&EvidenceItem> = evidence.iter().filter(|e| e.source == kind).collect();
        if items.is_empty() {
            continue;
        }

        let mut attributions: Vec<SourceAttribution> = Vec::new();
        attributions.try_reserve(items.len())?;
        for &item in &items {
            attributions.push(SourceAttribution {
                source: kind,
                citation: item.citation.clone(),
                contribution: share(item),
                timestamp: item.timestamp,
            });
        }

        let confidence = items.iter().map(|e| e.confidence).sum::<f64>() / items.len() as f64;
        let contribution: f64 = attributions.iter().map(|a| a.contribution).sum();
        let timestamp = items
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_else(chrono::Utc::now);
        let strongest = items
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.citation.cmp(&a.citation))
            })
            .map(|e| e.content.as_str())
            .unwrap_or_default();

        trace.attributions.extend(attributions.iter().cloned());
        trace.steps.push(ReasoningStep {
            source: kind,
            description: format!(
                "{} evidence ({} item(s)): {}",
                kind,
                items.len(),
                strongest
            ),
            attributions,
            confidence,
            contribution,
            timestamp,
        });
    }

    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_one_step_per_source_in_canonical_order() {
        let now = Utc::now();
        let evidence = vec![
            EvidenceItem::new(SourceKind::Experience, "practice", 0.5, "practice_1", now),
            EvidenceItem::new(SourceKind::Memory, "note", 0.5, "memory:1", now),
            EvidenceItem::new(SourceKind::Code, "hit", 0.5, "src/a.rs:1", now),
            EvidenceItem::new(SourceKind::Memory, "note 2", 0.5, "memory:2", now),
        ];
        let trace = build_trace(&evidence).unwrap();
        let kinds: Vec<SourceKind> = trace.steps.iter().map(|s| s.source).collect();
        assert_eq!(
            kinds,
            vec![SourceKind::Memory, SourceKind::Code, SourceKind::Experience]
        );
        assert_eq!(trace.steps[0].source_count(), 2);
        assert_eq!(trace.attributions.len(), evidence.len());
    }

    #[test]
    fn test_contributions_sum_to_one() {
        let now = Utc::now();
        let evidence = vec![
            EvidenceItem::new(SourceKind::Memory, "a", 0.9, "m1", now),
            EvidenceItem::new(SourceKind::Code, "b", 0.3, "src/b.rs:2", now),
            EvidenceItem::new(SourceKind::Pattern, "c", 0.6, "pattern:1", now),
        ];
        let trace = build_trace(&evidence).unwrap();
        let steps: f64 = trace.steps.iter().map(|s| s.contribution).sum();
        let attrs: f64 = trace.attributions.iter().map(|a| a.contribution).sum();
        assert!((steps - 1.0).abs() < 1e-9);
        assert!((attrs - 1.0).abs() < 1e-9);
        assert!((trace.steps[0].contribution - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_confidence_evidence_shares_uniformly() {
        let now = Utc::now();
        let evidence = vec![
            EvidenceItem::new(SourceKind::Memory, "a", 0.0, "m1", now),
            EvidenceItem::new(SourceKind::Code, "b", 0.0, "src/b.rs:2", now),
        ];
        let trace = build_trace(&evidence).unwrap();
        assert!((trace.steps[0].contribution - 0.5).abs() < 1e-9);
        assert!((trace.steps[1].contribution - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_attributions_preserve_citation_and_timestamp() {
        let older = Utc::now() - Duration::days(3);
        let evidence = vec![EvidenceItem::new(SourceKind::Code, "hit", 0.4, "src/x.rs:9", older)];
        let trace = build_trace(&evidence).unwrap();
        let attr = &trace.steps[0].attributions[0];
        assert_eq!(attr.citation, "src/x.rs:9");
        assert_eq!(attr.timestamp, older);
        assert_eq!(trace.steps[0].timestamp, older);
    }

    #[test]
    fn test_empty_evidence_yields_empty_trace() {
        let trace = build_trace(&[]).unwrap();
        assert!(trace.steps.is_empty());
        assert!(trace.attributions.is_empty());
    }
}
