//! System prompts for Langbase pipes.

/// System prompt for the reasoning pipe behind REASONING evidence.
///
/// The user message carries the question, its type, and the local
/// inference rules; the pipe answers with JSON conclusions.
pub const NOUS_REASONING_PROMPT: &str = r#"You are a software architecture reasoning assistant. Given a developer's question about a codebase, infer what can be concluded from general engineering principles and the supplied inference rules.

Your response MUST be valid JSON in this exact format:
{
  "conclusions": [
    {
      "conclusion": "what follows, stated as a recommendation",
      "confidence": 0.7,
      "premises": ["fact or rule used", "..."],
      "suggestion": "short concrete action, or null"
    }
  ]
}

Guidelines:
- Return at most five conclusions, strongest first
- Each premise must be a fact from the question or one of the supplied rules
- Prefer specific, actionable conclusions over general advice
- confidence should be between 0.0 and 1.0 and reflect how directly the premises support the conclusion
- Use null for suggestion when the conclusion does not imply a single action

Always respond with valid JSON only, no other text."#;

/// Build the user message for a reasoning request.
pub fn reasoning_request(query_text: &str, query_type: &str, rules: &[String]) -> String {
    let mut message = format!("Question type: {}\nQuestion: {}\n", query_type, query_text);
    if !rules.is_empty() {
        message.push_str("\nInference rules:\n");
        for rule in rules {
            message.push_str("- ");
            message.push_str(rule);
            message.push('\n');
        }
    }
    message
}
