//! Remote LLM provider using OpenAI-compatible APIs
//!
//! Supports any OpenAI-compatible `/chat/completions` endpoint with
//! configurable URL, model, and API key via environment variable.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::{KeepsakeError, Result};
use crate::llm::LlmProvider;
use crate::resilience::{CircuitBreaker, RetryPolicy, post_json};

/// Remote LLM using OpenAI-compatible HTTP APIs
#[derive(Debug)]
pub struct RemoteLlm {
    client: Client,
    config: LlmConfig,
    api_key: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteLlm {
    /// Create a new remote LLM client with the given configuration
    ///
    /// Reads the API key from the environment variable specified in config.api_key_env.
    /// Returns an error if the environment variable is not set.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            KeepsakeError::Config(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(KeepsakeError::Config(
                "llm.api_url is required when the LLM is enabled".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KeepsakeError::Llm(e.to_string()))?;

        info!(
            "RemoteLlm initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
            retry: RetryPolicy::new(config.max_retries, Duration::from_secs(1)),
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl LlmProvider for RemoteLlm {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        debug!("Calling remote API at: {}", url);

        let response = post_json(
            &self.client,
            &url,
            &self.api_key,
            &request,
            &self.retry,
            &self.breaker,
        )
        .await
        .map_err(KeepsakeError::Llm)?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| KeepsakeError::Llm(format!("Failed to parse completion: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| KeepsakeError::Llm("Empty response".to_string()))
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty() && !self.breaker.is_open()
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(api_url: String) -> LlmConfig {
        LlmConfig {
            enabled: true,
            api_url,
            api_key_env: "KEEPSAKE_TEST_LLM_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            ..LlmConfig::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": {
                    "content": content
                }
            }]
        })
    }

    #[test]
    fn test_remote_llm_new_missing_api_key() {
        let mut config = create_test_config("https://api.example.com/v1".to_string());
        config.api_key_env = "KEEPSAKE_TEST_LLM_KEY_NEVER_SET".to_string();

        let err = RemoteLlm::new(&config).unwrap_err().to_string();
        assert!(err.contains("KEEPSAKE_TEST_LLM_KEY_NEVER_SET"));
    }

    #[test]
    fn test_remote_llm_new_reads_env() {
        unsafe { env::set_var("KEEPSAKE_TEST_LLM_KEY", "test-key") };
        let llm = RemoteLlm::new(&create_test_config("https://api.example.com/v1".to_string()))
            .unwrap();
        assert!(llm.is_available());
        assert_eq!(llm.name(), "remote");
    }

    #[test]
    fn test_remote_llm_requires_url() {
        let config = create_test_config(String::new());
        assert!(RemoteLlm::with_api_key(&config, "k").is_err());
    }

    #[tokio::test]
    async fn test_complete_sends_system_and_user() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hi there")))
            .mount(&mock_server)
            .await;

        let llm = RemoteLlm::with_api_key(&create_test_config(mock_server.uri()), "test-key")
            .unwrap();
        assert_eq!(llm.complete("sys", "hello").await.unwrap(), "hi there");
    }

    #[tokio::test]
    async fn test_rate_limit_retry() {
        let mock_server = MockServer::start().await;

        // First call returns 429, second succeeds
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&mock_server)
            .await;

        let llm = RemoteLlm::with_api_key(&create_test_config(mock_server.uri()), "k")
            .unwrap()
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(50)));

        let start = std::time::Instant::now();
        let result = llm.complete("s", "u").await;
        let elapsed = start.elapsed();

        assert_eq!(result.unwrap(), "ok");
        assert!(elapsed >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_server_error_exhausts_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .expect(2)
            .mount(&mock_server)
            .await;

        let llm = RemoteLlm::with_api_key(&create_test_config(mock_server.uri()), "k")
            .unwrap()
            .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)));

        let err = llm.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, KeepsakeError::Llm(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&mock_server)
            .await;

        let llm = RemoteLlm::with_api_key(&create_test_config(mock_server.uri()), "k").unwrap();
        assert!(llm.complete("s", "u").await.is_err());
    }

    #[tokio::test]
    async fn test_breaker_makes_provider_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let mut config = create_test_config(mock_server.uri());
        config.breaker_threshold = 1;
        let llm = RemoteLlm::with_api_key(&config, "k")
            .unwrap()
            .with_retry_policy(RetryPolicy::new(1, Duration::ZERO));

        assert!(llm.is_available());
        assert!(llm.complete("s", "u").await.is_err());
        assert!(!llm.is_available());
    }
}
