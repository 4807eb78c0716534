use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Run a pipe, retrying with exponential backoff.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = request.name.clone();

        let mut last_error = None;
        let mut attempt = 0;

        while attempt <= self.request_config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(attempt - 1)),
                );
                warn!(
                    pipe = %pipe_name,
                    retry = attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            match self.execute_request(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                // 4xx other than 429 is final
                Err(LangbaseError::Api { status, message })
                    if (400..500).contains(&status) && status != 429 =>
                {
                    error!(pipe = %pipe_name, status, "Langbase rejected request");
                    return Err(LangbaseError::Api { status, message });
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = attempt,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                    attempt += 1;
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries: attempt,
        })
    }

    /// Run a pipe and parse its completion as JSON.
    pub async fn call_pipe_json<T: DeserializeOwned>(&self, request: PipeRequest) -> LangbaseResult<T> {
        let response = self.call_pipe(request).await?;
        if !response.success {
            return Err(LangbaseError::InvalidResponse {
                message: "pipe reported success=false".to_string(),
            });
        }
        let json = extract_json_from_completion(&response.completion)
            .map_err(|message| LangbaseError::InvalidResponse { message })?;
        serde_json::from_str(json).map_err(|e| LangbaseError::InvalidResponse {
            message: format!("Failed to parse completion: {}", e),
        })
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &PipeRequest,
    ) -> LangbaseResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Pull the JSON payload out of a completion.
///
/// Accepts raw JSON, a fenced ```json block, or a bare fenced block.
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    let fenced = if completion.contains("```json") {
        completion.split("```json").nth(1)
    } else {
        completion.split("```").nth(1)
    };
    if let Some(body) = fenced
        .and_then(|s| s.split("```").next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Ok(body);
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = LangbaseConfig {
            api_key: "test_key".to_string(),
            base_url: "https://api.langbase.com/".to_string(),
        };

        let client = LangbaseClient::new(&config, RequestConfig::default()).unwrap();
        assert_eq!(client.base_url(), "https://api.langbase.com");
    }

    #[test]
    fn test_extract_json_raw() {
        assert_eq!(
            extract_json_from_completion(r#"  {"a": 1} "#).unwrap(),
            r#"{"a": 1}"#
        );
    }

    #[test]
    fn test_extract_json_fenced() {
        let completion = "Here you go:\n```json\n{\"a\": 1}\n```\nDone";
        assert_eq!(extract_json_from_completion(completion).unwrap(), "{\"a\": 1}");

        let bare = "```\n[1]\n```";
        assert_eq!(extract_json_from_completion(bare).unwrap(), "[1]");
    }

    #[test]
    fn test_extract_json_missing() {
        assert!(extract_json_from_completion("no json here").is_err());
        assert!(extract_json_from_completion("```json\n```").is_err());
    }
}
