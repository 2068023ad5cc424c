use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// First choice's text, if it carries any non-blank content.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("API request failed: {0}")]
    ApiError(String),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Timeout")]
    Timeout,
    #[error("Completion returned no content")]
    EmptyContent,
    #[error("Missing API key: set {0}")]
    MissingApiKey(String),
}

impl CompletionError {
    /// Stable code for journal events.
    pub fn code(&self) -> &'static str {
        match self {
            CompletionError::ApiError(_) => "COMPLETION_API_ERROR",
            CompletionError::HttpStatus { .. } => "COMPLETION_HTTP_ERROR",
            CompletionError::JsonError(_) => "COMPLETION_JSON_ERROR",
            CompletionError::Timeout => "COMPLETION_TIMEOUT",
            CompletionError::EmptyContent => "COMPLETION_EMPTY",
            CompletionError::MissingApiKey(_) => "COMPLETION_NO_KEY",
        }
    }
}
