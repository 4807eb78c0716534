use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message in a Langbase conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who is speaking.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions.
    System,
    /// Caller input.
    User,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request to run a Langbase pipe
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    /// Pipe name (required by Langbase API)
    pub name: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Always false; the client reads whole responses.
    pub stream: bool,
    /// Template variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

impl PipeRequest {
    /// Create a non-streaming request.
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
            variables: None,
        }
    }

    /// Add a single variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Response from a Langbase pipe
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    /// Whether the pipe ran.
    pub success: bool,
    /// Model output.
    pub completion: String,
    /// Conversation thread, if the pipe keeps one.
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    /// Model and token usage.
    pub raw: Option<RawResponse>,
}

/// Raw model response details
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    /// Model that answered.
    pub model: Option<String>,
    /// Token accounting.
    pub usage: Option<Usage>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub prompt_tokens: Option<u32>,
    /// Completion tokens.
    pub completion_tokens: Option<u32>,
    /// Sum of both.
    pub total_tokens: Option<u32>,
}

/// One conclusion proposed by the reasoning pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeConclusion {
    /// What the pipe concludes.
    pub conclusion: String,
    /// Its confidence in [0, 1].
    #[serde(default = "default_conclusion_confidence")]
    pub confidence: f64,
    /// Premises it reasoned from.
    #[serde(default)]
    pub premises: Vec<String>,
    /// Concrete recommendation, if the conclusion implies one.
    #[serde(default)]
    pub suggestion: Option<String>,
}

fn default_conclusion_confidence() -> f64 {
    0.5
}

/// JSON body the reasoning pipe is asked to return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConclusions {
    /// Proposed conclusions, strongest first.
    #[serde(default)]
    pub conclusions: Vec<PipeConclusion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_request_serializes_without_empty_variables() {
        let request = PipeRequest::new("nous-reasoning-v1", vec![Message::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["name"], "nous-reasoning-v1");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("variables").is_none());
    }

    #[test]
    fn test_with_variable() {
        let request = PipeRequest::new("p", vec![]).with_variable("query_type", "impact");
        assert_eq!(
            request.variables.unwrap().get("query_type").map(String::as_str),
            Some("impact")
        );
    }

    #[test]
    fn test_conclusions_defaults() {
        let parsed: ReasoningConclusions =
            serde_json::from_str(r#"{"conclusions":[{"conclusion":"c"}]}"#).unwrap();
        assert_eq!(parsed.conclusions[0].confidence, 0.5);
        assert!(parsed.conclusions[0].premises.is_empty());
        assert!(parsed.conclusions[0].suggestion.is_none());
    }

    #[test]
    fn test_pipe_response_parses_thread_id() {
        let response: PipeResponse = serde_json::from_str(
            r#"{"success":true,"completion":"{}","threadId":"t1","raw":null}"#,
        )
        .unwrap();
        assert!(response.success);
        assert_eq!(response.thread_id.as_deref(), Some("t1"));
    }
}
