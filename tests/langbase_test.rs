//! Integration tests for the Langbase client and the reasoning source
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_nous_compose::compose::{QueryType, SourceKind};
use mcp_nous_compose::config::{LangbaseConfig, RequestConfig};
use mcp_nous_compose::error::LangbaseError;
use mcp_nous_compose::langbase::{LangbaseClient, Message, PipeRequest, ReasoningConclusions};
use mcp_nous_compose::sources::{EvidenceSource, ReasoningSource, SearchFilters};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    LangbaseClient::new(&config, request_config).expect("Failed to create client")
}

fn create_test_request(content: &str) -> PipeRequest {
    PipeRequest::new("nous-reasoning-v1", vec![Message::user(content)])
}

fn completion(body: &str) -> serde_json::Value {
    json!({
        "success": true,
        "completion": body,
        "threadId": null,
        "raw": {
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        }
    })
}

#[cfg(test)]
mod pipe_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({"name": "nous-reasoning-v1", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("plain text")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let response = client.call_pipe(create_test_request("hello")).await.unwrap();

        assert!(response.success);
        assert_eq!(response.completion, "plain text");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client.call_pipe(create_test_request("hello")).await.unwrap_err();

        match err {
            LangbaseError::Unavailable { retries, .. } => assert_eq!(retries, 3),
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let err = client.call_pipe(create_test_request("hello")).await.unwrap_err();

        assert!(matches!(err, LangbaseError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_call_pipe_json_reads_fenced_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "```json\n{\"conclusions\":[{\"conclusion\":\"Keep helpers in util\",\"confidence\":0.8}]}\n```",
            )))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let parsed: ReasoningConclusions = client
            .call_pipe_json(create_test_request("hello"))
            .await
            .unwrap();

        assert_eq!(parsed.conclusions.len(), 1);
        assert_eq!(parsed.conclusions[0].confidence, 0.8);
    }

    #[tokio::test]
    async fn test_call_pipe_json_rejects_prose() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("I think so.")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let result: Result<ReasoningConclusions, _> =
            client.call_pipe_json(create_test_request("hello")).await;

        assert!(matches!(result, Err(LangbaseError::InvalidResponse { .. })));
    }
}

#[cfg(test)]
mod reasoning_source_tests {
    use super::*;

    const QUESTION: &str = "Where should the logging helper go?";

    #[tokio::test]
    async fn test_pipe_conclusions_become_evidence() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                &json!({
                    "conclusions": [{
                        "conclusion": "Logging is cross-cutting",
                        "confidence": 0.75,
                        "premises": ["helpers are shared"],
                        "suggestion": "Place it in src/util"
                    }]
                })
                .to_string(),
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = ReasoningSource::new()
            .with_langbase(create_test_client(&mock_server.uri(), 0), "nous-reasoning-v1");
        let items = source
            .search(QUESTION, QueryType::Placement, &SearchFilters::for_query(QUESTION, 5))
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, SourceKind::Reasoning);
        assert_eq!(items[0].citation, "langbase:nous-reasoning-v1#1");
        assert_eq!(items[0].confidence, 0.75);
        assert_eq!(items[0].suggestion.as_deref(), Some("Place it in src/util"));
        assert!(items[0].content.contains("from: helpers are shared"));
    }

    #[tokio::test]
    async fn test_pipe_failure_falls_back_to_local_rules() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let source = ReasoningSource::new()
            .with_langbase(create_test_client(&mock_server.uri(), 1), "nous-reasoning-v1");
        let items = source
            .search(QUESTION, QueryType::Placement, &SearchFilters::for_query(QUESTION, 5))
            .await
            .unwrap();

        assert!(!items.is_empty());
        assert!(items[0].citation.starts_with("inference:"));
        assert!(items[0].content.contains("confidence: 42%"));
    }
}
