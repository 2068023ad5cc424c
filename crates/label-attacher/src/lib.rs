//! Adapter boundary over the external sentiment classifier and entity
//! extractor.
//!
//! The pipeline never computes a label itself. A classifier failure is a typed
//! [`AdapterError`], never a silent `Neutral`, and it only affects the record
//! it happened on.

pub mod http;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::{read_table, write_table, LabeledRecord, NewsRecord, Sentiment};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub use http::{HttpEntityExtractor, HttpSentimentClassifier};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Unknown class index {0}")]
    UnknownClass(usize),
    #[error("Timeout")]
    Timeout,
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Transport(_) => "ADAPTER_TRANSPORT",
            AdapterError::HttpStatus { .. } => "ADAPTER_HTTP_ERROR",
            AdapterError::MalformedResponse(_) => "ADAPTER_BAD_RESPONSE",
            AdapterError::UnknownClass(_) => "ADAPTER_UNKNOWN_CLASS",
            AdapterError::Timeout => "ADAPTER_TIMEOUT",
        }
    }
}

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(&self, headline: &str) -> Result<Sentiment, AdapterError>;
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, headline: &str) -> Result<BTreeSet<String>, AdapterError>;
}

/// Keep entity words that look like tickers: word-piece markers stripped,
/// all-uppercase, one to five characters.
pub fn ticker_like_entities<'a, I>(words: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    words
        .into_iter()
        .map(|w| w.replace("##", "").trim().to_string())
        .filter(|w| {
            let len = w.chars().count();
            (1..=5).contains(&len)
                && w.chars().any(|c| c.is_alphabetic())
                && !w.chars().any(|c| c.is_lowercase())
        })
        .collect()
}

#[derive(Debug)]
pub struct LabelFailure {
    pub headline: String,
    pub error: AdapterError,
}

#[derive(Debug, Default)]
pub struct AttachReport {
    pub labeled: Vec<LabeledRecord>,
    pub failures: Vec<LabelFailure>,
    /// Records labeled without entity enrichment because extraction failed.
    pub entity_failures: usize,
}

pub async fn attach_labels(
    records: Vec<NewsRecord>,
    classifier: &dyn SentimentClassifier,
    extractor: Option<&dyn EntityExtractor>,
) -> AttachReport {
    let mut report = AttachReport::default();

    for mut record in records {
        let sentiment = match classifier.classify(&record.headline).await {
            Ok(sentiment) => sentiment,
            Err(error) => {
                warn!("Classifier failed for '{}': {}", record.headline, error);
                report.failures.push(LabelFailure {
                    headline: record.headline,
                    error,
                });
                continue;
            }
        };

        if let Some(extractor) = extractor {
            match extractor.extract(&record.headline).await {
                Ok(entities) => record.tickers.extend(entities),
                Err(e) => {
                    warn!("Entity extraction failed for '{}': {}", record.headline, e);
                    report.entity_failures += 1;
                }
            }
        }

        report.labeled.push(LabeledRecord { record, sentiment });
    }

    report
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelSummary {
    pub processed: usize,
    pub labeled: usize,
    pub failed: usize,
    pub entity_failures: usize,
    pub malformed_rows: usize,
    pub output: PathBuf,
}

/// Label every row of a `NewsRecord` table and write the labeled table.
pub async fn label_table(
    input: &Path,
    output: &Path,
    classifier: &dyn SentimentClassifier,
    extractor: Option<&dyn EntityExtractor>,
) -> common::Result<LabelSummary> {
    let read = read_table::<NewsRecord>(input)?;
    let processed = read.rows.len();
    info!("Labeling {} headlines from {}", processed, input.display());

    let report = attach_labels(read.rows, classifier, extractor).await;
    write_table(output, &report.labeled)?;

    let summary = LabelSummary {
        processed,
        labeled: report.labeled.len(),
        failed: report.failures.len(),
        entity_failures: report.entity_failures,
        malformed_rows: read.malformed.len(),
        output: output.to_path_buf(),
    };
    info!(
        "Labeled {}/{} headlines into {} ({} classifier failures)",
        summary.labeled,
        summary.processed,
        output.display(),
        summary.failed
    );
    Ok(summary)
}
