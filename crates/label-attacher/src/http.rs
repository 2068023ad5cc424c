use crate::{ticker_like_entities, AdapterError, EntityExtractor, SentimentClassifier};
use async_trait::async_trait;
use common::Sentiment;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

/// One grouped span; `entity_group` and scores are ignored.
#[derive(Debug, Deserialize)]
struct EntitySpan {
    word: String,
}

/// Shared POST plumbing for hosted inference endpoints.
struct InferenceEndpoint {
    client: Client,
    url: String,
    token: Option<String>,
}

impl InferenceEndpoint {
    fn new(url: String, token_env: Option<&str>, timeout_ms: u64) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AdapterError::Transport(format!("failed to build HTTP client: {}", e)))?;
        let token = token_env
            .and_then(|name| std::env::var(name).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self { client, url, token })
    }

    async fn post(&self, headline: &str) -> Result<Value, AdapterError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&InferenceRequest { inputs: headline });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::Timeout
            } else {
                AdapterError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(AdapterError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        debug!(status = status.as_u16(), "inference response");
        serde_json::from_str(&body).map_err(|e| AdapterError::MalformedResponse(e.to_string()))
    }
}

/// Index of the largest logit. NaN never wins.
fn argmax(logits: &[f64]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

fn logits_from(value: &Value) -> Option<Vec<f64>> {
    value
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()
}

/// Accepts `{"label_index": n}`, `{"logits": [..]}`, `[..]` or `[[..]]`.
pub(crate) fn class_index_from_body(body: &Value) -> Result<usize, AdapterError> {
    if let Some(index) = body.get("label_index").and_then(Value::as_u64) {
        return Ok(index as usize);
    }

    let logits = match body {
        Value::Object(map) => map.get("logits").and_then(|v| match v {
            Value::Array(rows) if rows.first().map_or(false, Value::is_array) => logits_from(&rows[0]),
            other => logits_from(other),
        }),
        Value::Array(rows) if rows.first().map_or(false, Value::is_array) => logits_from(&rows[0]),
        other => logits_from(other),
    };

    let logits = logits
        .ok_or_else(|| AdapterError::MalformedResponse(format!("no logits in {}", body)))?;
    argmax(&logits).ok_or_else(|| AdapterError::MalformedResponse("empty logits".into()))
}

/// Sequence classifier served over HTTP. Class indices map 0 Bearish,
/// 1 Bullish, 2 Neutral.
pub struct HttpSentimentClassifier {
    endpoint: InferenceEndpoint,
}

impl HttpSentimentClassifier {
    pub fn new(url: String, token_env: Option<&str>, timeout_ms: u64) -> Result<Self, AdapterError> {
        Ok(Self {
            endpoint: InferenceEndpoint::new(url, token_env, timeout_ms)?,
        })
    }
}

#[async_trait]
impl SentimentClassifier for HttpSentimentClassifier {
    #[instrument(skip(self, headline))]
    async fn classify(&self, headline: &str) -> Result<Sentiment, AdapterError> {
        let body = self.endpoint.post(headline).await?;
        let index = class_index_from_body(&body)?;
        Sentiment::from_class_index(index).ok_or(AdapterError::UnknownClass(index))
    }
}

/// Token-classification (NER) endpoint returning grouped entity spans.
pub struct HttpEntityExtractor {
    endpoint: InferenceEndpoint,
}

impl HttpEntityExtractor {
    pub fn new(url: String, token_env: Option<&str>, timeout_ms: u64) -> Result<Self, AdapterError> {
        Ok(Self {
            endpoint: InferenceEndpoint::new(url, token_env, timeout_ms)?,
        })
    }
}

#[async_trait]
impl EntityExtractor for HttpEntityExtractor {
    #[instrument(skip(self, headline))]
    async fn extract(&self, headline: &str) -> Result<BTreeSet<String>, AdapterError> {
        let body = self.endpoint.post(headline).await?;
        let spans: Vec<EntitySpan> = serde_json::from_value(body)
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;
        Ok(ticker_like_entities(spans.iter().map(|s| s.word.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_index_shapes() {
        assert_eq!(class_index_from_body(&json!({"label_index": 2})).unwrap(), 2);
        assert_eq!(class_index_from_body(&json!({"logits": [0.1, 2.5, -1.0]})).unwrap(), 1);
        assert_eq!(class_index_from_body(&json!([[3.0, 0.2, 0.1]])).unwrap(), 0);
        assert_eq!(class_index_from_body(&json!([0.0, 0.1, 0.9])).unwrap(), 2);
    }

    #[test]
    fn test_class_index_rejects_garbage() {
        let err = class_index_from_body(&json!({"label": "positive"})).unwrap_err();
        assert_eq!(err.code(), "ADAPTER_BAD_RESPONSE");
        let err = class_index_from_body(&json!([])).unwrap_err();
        assert_eq!(err.code(), "ADAPTER_BAD_RESPONSE");
    }

    #[test]
    fn test_unknown_class_is_typed_failure() {
        let index = class_index_from_body(&json!({"label_index": 7})).unwrap();
        assert!(Sentiment::from_class_index(index).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let classifier =
            HttpSentimentClassifier::new("http://127.0.0.1:9/classify".into(), None, 500).unwrap();
        let err = classifier.classify("Markets rally").await.unwrap_err();
        assert!(matches!(err, AdapterError::Transport(_) | AdapterError::Timeout));
    }
}
