use std::path::{Path, PathBuf};

use common::io::write_jsonl;
use common::table::read_table_with;
use common::{HasHeadline, InstructionRecord};
use llm_client::CompletionService;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pacing::CallPacer;
use crate::prompt::{build_prompt, FALLBACK_OUTPUT};
use crate::templates::choose_instruction;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub batch_size: usize,
    pub call_delay_ms: u64,
    pub max_calls_per_minute: Option<u32>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            call_delay_ms: 1000,
            max_calls_per_minute: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub records: Vec<InstructionRecord>,
    /// Records whose output is the fallback placeholder.
    pub api_failures: usize,
    pub batches: usize,
}

impl BuildReport {
    pub fn emitted(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub emitted: usize,
    pub api_failures: usize,
    pub batches: usize,
    pub output: PathBuf,
}

pub struct DatasetBuilder {
    service: Box<dyn CompletionService>,
    pacer: CallPacer,
    batch_size: usize,
}

impl DatasetBuilder {
    pub fn new(service: Box<dyn CompletionService>, config: &BuilderConfig) -> Self {
        Self {
            service,
            pacer: CallPacer::new(config.call_delay_ms, config.max_calls_per_minute),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn with_pacer(mut self, pacer: CallPacer) -> Self {
        self.pacer = pacer;
        self
    }

    async fn generate(&mut self, prompt: &str) -> Option<String> {
        self.pacer.wait().await;
        match self.service.complete(prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!("Completion came back blank; using fallback output");
                None
            }
            Err(e) => {
                warn!("Completion failed [{}]: {}", e.code(), e);
                None
            }
        }
    }

    /// One instruction record per input, in input order. Every input is
    /// emitted; failed calls carry [`FALLBACK_OUTPUT`].
    pub async fn build<H, R>(&mut self, records: &[H], rng: &mut R) -> BuildReport
    where
        H: HasHeadline,
        R: Rng,
    {
        let mut report = BuildReport::default();
        let total = records.len();

        for batch in records.chunks(self.batch_size) {
            for record in batch {
                let headline = record.headline();
                let instruction = choose_instruction(rng);
                let prompt = build_prompt(instruction, headline);

                let output = match self.generate(&prompt).await {
                    Some(text) => text,
                    None => {
                        report.api_failures += 1;
                        FALLBACK_OUTPUT.to_string()
                    }
                };

                report.records.push(InstructionRecord {
                    instruction: instruction.to_string(),
                    input: headline.to_string(),
                    output,
                });
            }
            report.batches += 1;
            info!(
                "Batch {} done: {}/{} records ({} fallbacks so far)",
                report.batches,
                report.records.len(),
                total,
                report.api_failures
            );
        }

        report
    }

    /// Read headlines from a table (only a `headline` column is required),
    /// generate, and write the dataset as JSONL.
    pub async fn build_file<R>(
        &mut self,
        input: &Path,
        output: &Path,
        rng: &mut R,
    ) -> common::Result<BuildSummary>
    where
        R: Rng,
    {
        let read = read_table_with(input, &["headline"], |row| {
            let headline = row.required("headline")?.trim();
            if headline.is_empty() {
                return Err("empty headline".to_string());
            }
            Ok(headline.to_string())
        })?;
        info!("Building instructions for {} headlines from {}", read.rows.len(), input.display());

        let report = self.build(&read.rows, rng).await;
        write_jsonl(output, &report.records)?;

        let summary = BuildSummary {
            rows_read: read.rows.len(),
            malformed_rows: read.malformed.len(),
            emitted: report.emitted(),
            api_failures: report.api_failures,
            batches: report.batches,
            output: output.to_path_buf(),
        };
        info!(
            "Wrote {} instruction records to {} ({} fallbacks)",
            summary.emitted,
            output.display(),
            summary.api_failures
        );
        Ok(summary)
    }
}
