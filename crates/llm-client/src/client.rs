use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, CompletionError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument};

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// A text-completion backend: prompt in, free text out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// OpenAI-compatible chat-completions client (OpenRouter by default).
pub struct OpenRouterClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_retries: u32,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterClient {
    pub fn new(
        api_key: String,
        model: String,
        timeout_ms: u64,
        max_retries: u32,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| CompletionError::ApiError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: OPENROUTER_API_URL.to_string(),
            api_key,
            model,
            temperature: 0.7,
            max_retries,
            referer: None,
            title: None,
        })
    }

    /// Read the key from `api_key_env`; the key never passes through pipeline
    /// configuration.
    pub fn from_env(
        api_key_env: &str,
        model: String,
        timeout_ms: u64,
        max_retries: u32,
    ) -> Result<Self, CompletionError> {
        let api_key = std::env::var(api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CompletionError::MissingApiKey(api_key_env.to_string()))?;
        Self::new(api_key, model, timeout_ms, max_retries)
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Attribution headers OpenRouter uses for app rankings.
    pub fn with_attribution(mut self, referer: Option<String>, title: Option<String>) -> Self {
        self.referer = referer.filter(|r| !r.trim().is_empty());
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    fn payload(&self, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
        }
    }

    async fn backoff(attempt: u32) {
        sleep(Duration::from_millis(150 * u64::from(attempt))).await;
    }
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let payload = self.payload(prompt);

        let mut attempt = 0u32;
        loop {
            let mut request = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json");
            if let Some(referer) = &self.referer {
                request = request.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.title {
                request = request.header("X-Title", title);
            }

            match request.json(&payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        if (status.as_u16() == 429 || status.is_server_error())
                            && attempt < self.max_retries
                        {
                            attempt += 1;
                            debug!("completion status {}; retry {}", status, attempt);
                            Self::backoff(attempt).await;
                            continue;
                        }
                        return Err(CompletionError::HttpStatus {
                            status: status.as_u16(),
                            body,
                        });
                    }

                    let raw = response
                        .text()
                        .await
                        .map_err(|e| CompletionError::ApiError(e.to_string()))?;
                    let body: ChatCompletionResponse = serde_json::from_str(&raw)?;
                    return body
                        .first_content()
                        .map(|text| text.trim().to_string())
                        .ok_or(CompletionError::EmptyContent);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        attempt += 1;
                        debug!("completion transport error ({}); retry {}", e, attempt);
                        Self::backoff(attempt).await;
                        continue;
                    }
                    if e.is_timeout() {
                        return Err(CompletionError::Timeout);
                    }
                    return Err(CompletionError::ApiError(e.to_string()));
                }
            }
        }
    }
}
