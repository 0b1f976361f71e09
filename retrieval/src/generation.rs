//! HTTP text generation over an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::config::GenerationConfig;
use crate::error::Result;
use crate::error::RetrievalErr;
use crate::traits::GenerationParams;
use crate::traits::TextGenerator;

/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Base delay between retry attempts, scaled linearly per attempt.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// Chat-completions client implementing [`TextGenerator`].
///
/// The client is pure transport; model, temperature, token budget, and
/// deadline arrive per call in [`GenerationParams`]. Transport failures,
/// HTTP 429, and 5xx responses are retried up to `max_retries` times;
/// other client errors fail immediately.
#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    api_key: Option<String>,
    base_url: String,
    max_retries: i32,
    client: reqwest::Client,
}

impl HttpTextGenerator {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 2,
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from the generation config section.
    pub fn from_config(config: &GenerationConfig) -> Self {
        let mut generator = Self::new().with_max_retries(config.max_retries);
        if let Some(api_base) = &config.api_base {
            generator = generator.with_base_url(api_base);
        }
        if let Some(api_key) = &config.api_key {
            generator = generator.with_api_key(api_key);
        }
        generator
    }

    /// Set the bearer token sent with each request.
    ///
    /// Local inference servers typically need none.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL for API requests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set how many times a retryable failure is retried.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    async fn try_request(
        &self,
        url: &str,
        request: &CompletionRequest,
        deadline: std::time::Duration,
    ) -> std::result::Result<String, AttemptError> {
        let mut builder = self.client.post(url).timeout(deadline).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Retryable(format!("API error {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(format!("API error {status}: {body}")));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AttemptError::Fatal("empty completion".to_string()))
    }
}

impl Default for HttpTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: params.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let attempts = self.max_retries + 1;
        let mut last_cause = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY * attempt as u32).await;
            }
            match self.try_request(&url, &request, params.timeout).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Fatal(cause)) => {
                    return Err(RetrievalErr::GenerationFailed { cause });
                }
                Err(AttemptError::Retryable(cause)) => {
                    warn!(attempt, cause = %cause, "generation request failed");
                    last_cause = cause;
                }
            }
        }

        Err(RetrievalErr::GenerationFailed {
            cause: format!("gave up after {attempts} attempts: {last_cause}"),
        })
    }
}

/// One attempt's failure, split by whether another attempt could help.
enum AttemptError {
    Retryable(String),
    Fatal(String),
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: i32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::*;

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": content
                }
            }]
        })
    }

    fn make_generator(server: &MockServer) -> HttpTextGenerator {
        HttpTextGenerator::new().with_base_url(server.uri())
    }

    #[test]
    fn test_builder_defaults() {
        let generator = HttpTextGenerator::new();
        assert_eq!(generator.base_url, DEFAULT_BASE_URL);
        assert!(generator.api_key.is_none());
        assert_eq!(generator.max_retries, 2);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let generator = HttpTextGenerator::new().with_base_url("http://localhost:8080/v1/");
        assert_eq!(generator.base_url, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_generate_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body("felines pursue canines")),
            )
            .mount(&server)
            .await;

        let text = make_generator(&server)
            .generate("rewrite this", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "felines pursue canines");
    }

    #[tokio::test]
    async fn test_api_key_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let text = make_generator(&server)
            .with_api_key("sk-test-key")
            .generate("rewrite this", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let error = make_generator(&server)
            .with_max_retries(3)
            .generate("rewrite this", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
            .mount(&server)
            .await;

        let text = make_generator(&server)
            .generate("rewrite this", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "recovered");
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let error = make_generator(&server)
            .with_max_retries(1)
            .generate("rewrite this", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("gave up after 2 attempts"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&server)
            .await;

        let error = make_generator(&server)
            .generate("rewrite this", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("empty completion"));
    }
}
