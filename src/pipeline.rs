use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::{write_table, LabeledRecord};
use dataset_builder::DatasetBuilder;
use dataset_cleaner::{clean_csv, clean_into, shuffle_file};
use label_attacher::{
    label_table, EntityExtractor, HttpEntityExtractor, HttpSentimentClassifier, SentimentClassifier,
};
use llm_client::{CompletionService, OpenRouterClient};
use news_parser::{LineParser, SourceGrammar};
use rand::rngs::StdRng;
use rand::SeedableRng;
use record_merger::{merge_dumps, merge_table_files};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::journal::{resolve_runs_dir, RunJournal};

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Runs pipeline stages against one configuration and journals each stage.
pub struct Pipeline {
    config: AppConfig,
    parser: LineParser,
    journal: RunJournal,
    run_id: Uuid,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_journal_dir(config, resolve_runs_dir())
    }

    pub fn with_journal_dir(config: AppConfig, journal_dir: PathBuf) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let journal = RunJournal::open(journal_dir.clone(), run_id)
            .with_context(|| format!("opening run journal in {}", journal_dir.display()))?;
        let parser = LineParser::new(config.run_date());
        info!("Run {} journal path: {}", run_id, journal.dir().display());

        Ok(Self {
            config,
            parser,
            journal,
            run_id,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn record<S: Serialize>(&mut self, kind: &str, summary: &S) {
        self.journal.event(kind, json!({ "summary": summary }));
    }

    fn record_failure(&mut self, stage: &str, err: &anyhow::Error) {
        error!("Stage {} failed: {:#}", stage, err);
        self.journal.event(
            "stage_failed",
            json!({ "stage": stage, "error": format!("{:#}", err) }),
        );
    }

    /// Parse one dump into a table.
    pub fn parse(&mut self, input: &Path, grammar: SourceGrammar, output: &Path) -> Result<()> {
        let result = (|| -> Result<_> {
            let report = self.parser.parse_file(input, grammar)?;
            write_table(output, &report.records)?;
            Ok(json!({
                "input": input,
                "grammar": grammar,
                "parsed": report.parsed(),
                "skipped": report.skipped(),
                "output": output,
            }))
        })();
        match result {
            Ok(summary) => {
                self.record("parse_summary", &summary);
                Ok(())
            }
            Err(e) => {
                self.record_failure("parse", &e);
                Err(e)
            }
        }
    }

    /// Parse and merge every configured group.
    pub fn merge(&mut self) -> Result<()> {
        for group in self.config.groups.clone() {
            match merge_dumps(&self.parser, &group.sources, &group.output) {
                Ok(summary) => {
                    info!("Group {}: {} rows", group.name, summary.rows_written);
                    self.record("merge_summary", &json!({ "group": group.name, "merge": summary }));
                }
                Err(e) => {
                    let e = anyhow::Error::new(e).context(format!("merging group {}", group.name));
                    self.record_failure("merge", &e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Label each group's table, then merge the labeled tables.
    pub async fn label(
        &mut self,
        classifier: &dyn SentimentClassifier,
        extractor: Option<&dyn EntityExtractor>,
    ) -> Result<()> {
        let mut labeled_tables = Vec::new();
        for group in self.config.groups.clone() {
            let group_extractor = if group.extract_entities { extractor } else { None };
            match label_table(&group.output, &group.labeled_output, classifier, group_extractor).await {
                Ok(summary) => {
                    self.record("label_summary", &json!({ "group": group.name, "label": summary }));
                    labeled_tables.push(group.labeled_output.clone());
                }
                Err(e) => {
                    let e = anyhow::Error::new(e).context(format!("labeling group {}", group.name));
                    self.record_failure("label", &e);
                    return Err(e);
                }
            }
        }

        let output = self.config.paths.labeled_merged.clone();
        match merge_table_files::<LabeledRecord>(&labeled_tables, &output) {
            Ok(summary) => {
                self.record("labeled_merge_summary", &summary);
                Ok(())
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("merging labeled tables");
                self.record_failure("label", &e);
                Err(e)
            }
        }
    }

    pub async fn build(&mut self, service: Box<dyn CompletionService>) -> Result<()> {
        let mut builder = DatasetBuilder::new(service, &self.config.builder);
        let input = self.config.paths.labeled_merged.clone();
        let output = self.config.paths.instructions.clone();
        let mut rng = rng_from(None);

        match builder.build_file(&input, &output, &mut rng).await {
            Ok(summary) => {
                self.record("build_summary", &summary);
                Ok(())
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("building instruction dataset");
                self.record_failure("build", &e);
                Err(e)
            }
        }
    }

    pub fn clean(&mut self) -> Result<()> {
        let input = self.config.paths.instructions.clone();
        let output = self.config.paths.cleaned.clone();
        match clean_into(&input, &output, &self.config.cleaner) {
            Ok(report) => {
                self.record("clean_summary", &report);
                Ok(())
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("cleaning instruction dataset");
                self.record_failure("clean", &e);
                Err(e)
            }
        }
    }

    pub fn clean_csv(&mut self, input: &Path, output: &Path) -> Result<()> {
        match clean_csv(input, output, &self.config.cleaner) {
            Ok(report) => {
                self.record("clean_csv_summary", &report);
                Ok(())
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("cleaning CSV dataset");
                self.record_failure("clean", &e);
                Err(e)
            }
        }
    }

    pub fn shuffle(&mut self) -> Result<()> {
        let input = self.config.paths.cleaned.clone();
        let output = self.config.paths.shuffled.clone();
        let mut rng = rng_from(self.config.shuffle.seed);
        match shuffle_file(&input, &output, &mut rng) {
            Ok(report) => {
                self.record("shuffle_summary", &report);
                Ok(())
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("shuffling cleaned dataset");
                self.record_failure("shuffle", &e);
                Err(e)
            }
        }
    }

    /// Every stage in order with the given adapters. The first fatal stage
    /// error ends the run.
    pub async fn run_with(
        &mut self,
        classifier: &dyn SentimentClassifier,
        extractor: Option<&dyn EntityExtractor>,
        service: Box<dyn CompletionService>,
        shuffle: bool,
    ) -> Result<()> {
        self.journal.event(
            "run_start",
            json!({
                "run_date": self.parser.run_date().to_string(),
                "groups": self.config.groups.iter().map(|g| g.name.clone()).collect::<Vec<_>>(),
                "model": self.config.llm.model,
            }),
        );

        self.merge()?;
        self.label(classifier, extractor).await?;
        self.build(service).await?;
        self.clean()?;
        if shuffle {
            self.shuffle()?;
        }

        self.journal.event("run_complete", serde_json::Value::Null);
        info!("Run {} complete", self.run_id);
        Ok(())
    }

    /// Every stage with the configured HTTP adapters.
    pub async fn run(&mut self, shuffle: bool) -> Result<()> {
        let classifier = self.classifier()?;
        let extractor = self.entity_extractor()?;
        let service = self.completion_service()?;
        self.run_with(&classifier, extractor.as_ref().map(|e| e as &dyn EntityExtractor), service, shuffle)
            .await
    }

    pub fn classifier(&self) -> Result<HttpSentimentClassifier> {
        let c = &self.config.classifier;
        Ok(HttpSentimentClassifier::new(
            c.endpoint.clone(),
            self.config.token_env(),
            c.timeout_ms,
        )?)
    }

    /// `None` when no group asks for entity extraction.
    pub fn entity_extractor(&self) -> Result<Option<HttpEntityExtractor>> {
        if !self.config.groups.iter().any(|g| g.extract_entities) {
            return Ok(None);
        }
        let c = &self.config.classifier;
        Ok(Some(HttpEntityExtractor::new(
            c.ner_endpoint.clone(),
            self.config.token_env(),
            c.timeout_ms,
        )?))
    }

    pub fn completion_service(&self) -> Result<Box<dyn CompletionService>> {
        let llm = &self.config.llm;
        let client = OpenRouterClient::from_env(
            &llm.api_key_env,
            llm.model.clone(),
            llm.timeout_ms,
            llm.max_retries,
        )?
        .with_api_url(llm.api_url.clone())
        .with_temperature(llm.temperature)
        .with_attribution(llm.referer.clone(), llm.title.clone());
        Ok(Box::new(client))
    }
}
