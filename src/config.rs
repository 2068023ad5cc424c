//! Configuration loader: defaults, then `config.toml`, then `PIPELINE_*`
//! environment overrides. `.env` is read first so overrides can live there.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use common::PipelineError;
use dataset_builder::BuilderConfig;
use dataset_cleaner::CleanerConfig;
use news_parser::SourceGrammar;
use record_merger::DumpSource;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub groups: Vec<GroupConfig>,
    pub paths: PathsConfig,
    pub parser: ParserConfig,
    pub classifier: ClassifierConfig,
    pub llm: LlmConfig,
    pub builder: BuilderConfig,
    pub cleaner: CleanerConfig,
    pub shuffle: ShuffleConfig,
}

/// Dumps merged into one table and labeled together.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub sources: Vec<DumpSource>,
    pub output: PathBuf,
    pub labeled_output: PathBuf,
    #[serde(default)]
    pub extract_entities: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub labeled_merged: PathBuf,
    pub instructions: PathBuf,
    pub cleaned: PathBuf,
    pub shuffled: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Date stamped on stock-news rows; today when unset.
    pub run_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub ner_endpoint: String,
    /// Name of the environment variable holding the bearer token, if any.
    pub token_env: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub api_url: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub temperature: f64,
    pub referer: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Fixed seed for reproducible shuffles; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            groups: vec![
                GroupConfig {
                    name: "finviz_tradingview".into(),
                    sources: vec![
                        DumpSource {
                            path: "data/raw/tradingview_news.txt".into(),
                            grammar: SourceGrammar::TradingView,
                        },
                        DumpSource {
                            path: "data/raw/finviz_market_news.txt".into(),
                            grammar: SourceGrammar::FinvizMarket,
                        },
                    ],
                    output: "data/processed/finviz_tradingview_merged.csv".into(),
                    labeled_output: "data/sentiment_encoded/finviz_sentiment_tradingview.csv".into(),
                    extract_entities: true,
                },
                GroupConfig {
                    name: "finviz_stock".into(),
                    sources: vec![DumpSource {
                        path: "data/raw/finviz_stock_news.txt".into(),
                        grammar: SourceGrammar::FinvizStock,
                    }],
                    output: "data/processed/finviz_stock_news.csv".into(),
                    labeled_output: "data/sentiment_encoded/finviz_sentiment_stock_news.csv".into(),
                    extract_entities: false,
                },
            ],
            paths: PathsConfig::default(),
            parser: ParserConfig::default(),
            classifier: ClassifierConfig::default(),
            llm: LlmConfig::default(),
            builder: BuilderConfig::default(),
            cleaner: CleanerConfig::default(),
            shuffle: ShuffleConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            labeled_merged: "data/merged/finviz_tradingview_merged.csv".into(),
            instructions: "data/converted_jsonl/converted.jsonl".into(),
            cleaned: "data/cleaned_jsonl/final_cleaned.jsonl".into(),
            shuffled: "data/cleaned_jsonl/final_shuffled.jsonl".into(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/finbert".into(),
            ner_endpoint: "http://127.0.0.1:8080/ner".into(),
            token_env: String::new(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "meta-llama/llama-3-8b-instruct".into(),
            api_url: llm_client::OPENROUTER_API_URL.into(),
            api_key_env: "OPENROUTER_API_KEY".into(),
            timeout_ms: 30_000,
            max_retries: 2,
            temperature: 0.7,
            referer: None,
            title: None,
        }
    }
}

impl AppConfig {
    pub fn run_date(&self) -> NaiveDate {
        self.parser
            .run_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn token_env(&self) -> Option<&str> {
        let name = self.classifier.token_env.trim();
        (!name.is_empty()).then_some(name)
    }
}

fn parse_env<T: std::str::FromStr>(raw: &str, env_name: &str, expected: &str) -> Result<T, PipelineError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| PipelineError::Config(format!("{env_name} must be {expected}")))
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<(), PipelineError> {
    if let Ok(raw) = std::env::var("PIPELINE_RUN_DATE") {
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| PipelineError::Config("PIPELINE_RUN_DATE must be YYYY-MM-DD".into()))?;
        config.parser.run_date = Some(date);
    }
    if let Ok(model) = std::env::var("PIPELINE_LLM_MODEL") {
        config.llm.model = model.trim().to_string();
    }
    if let Ok(url) = std::env::var("PIPELINE_CLASSIFIER_ENDPOINT") {
        config.classifier.endpoint = url.trim().to_string();
    }
    if let Ok(url) = std::env::var("PIPELINE_NER_ENDPOINT") {
        config.classifier.ner_endpoint = url.trim().to_string();
    }
    if let Ok(raw) = std::env::var("PIPELINE_BATCH_SIZE") {
        config.builder.batch_size = parse_env(&raw, "PIPELINE_BATCH_SIZE", "an integer > 0")?;
    }
    if let Ok(raw) = std::env::var("PIPELINE_CALL_DELAY_MS") {
        config.builder.call_delay_ms = parse_env(&raw, "PIPELINE_CALL_DELAY_MS", "an integer >= 0")?;
    }
    if let Ok(raw) = std::env::var("PIPELINE_MAX_CALLS_PER_MINUTE") {
        config.builder.max_calls_per_minute =
            Some(parse_env(&raw, "PIPELINE_MAX_CALLS_PER_MINUTE", "an integer > 0")?);
    }
    if let Ok(raw) = std::env::var("PIPELINE_MIN_OUTPUT_LEN") {
        config.cleaner.min_output_len = parse_env(&raw, "PIPELINE_MIN_OUTPUT_LEN", "an integer >= 0")?;
    }
    if let Ok(raw) = std::env::var("PIPELINE_SHUFFLE_SEED") {
        config.shuffle.seed = Some(parse_env(&raw, "PIPELINE_SHUFFLE_SEED", "an unsigned integer")?);
    }
    Ok(())
}

pub fn validate_config(config: &AppConfig) -> Result<(), PipelineError> {
    let mut issues: Vec<String> = Vec::new();

    if config.groups.is_empty() {
        issues.push("groups must contain at least one group".into());
    }
    for group in &config.groups {
        if group.name.trim().is_empty() {
            issues.push("every group needs a name".into());
        }
        if group.sources.is_empty() {
            issues.push(format!("group '{}' has no sources", group.name));
        }
        if group.output == group.labeled_output {
            issues.push(format!("group '{}' output and labeled_output must differ", group.name));
        }
    }

    if config.classifier.endpoint.trim().is_empty() {
        issues.push("classifier.endpoint must be set".into());
    }
    if config.groups.iter().any(|g| g.extract_entities) && config.classifier.ner_endpoint.trim().is_empty() {
        issues.push("classifier.ner_endpoint must be set when a group extracts entities".into());
    }
    if config.classifier.timeout_ms == 0 {
        issues.push("classifier.timeout_ms must be > 0".into());
    }

    if config.llm.model.trim().is_empty() {
        issues.push("llm.model must be set".into());
    }
    if config.llm.api_key_env.trim().is_empty() {
        issues.push("llm.api_key_env must name an environment variable".into());
    }
    if config.llm.timeout_ms == 0 {
        issues.push("llm.timeout_ms must be > 0".into());
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        issues.push("llm.temperature must be in [0,2]".into());
    }

    if config.builder.batch_size == 0 {
        issues.push("builder.batch_size must be > 0".into());
    }
    if config.builder.max_calls_per_minute == Some(0) {
        issues.push("builder.max_calls_per_minute must be > 0 when set".into());
    }

    if config.paths.cleaned == config.paths.instructions {
        issues.push("paths.cleaned must differ from paths.instructions".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load configuration. An explicit `path` must exist; otherwise `config.toml`
/// is used when present.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, PipelineError> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let mut config = AppConfig::default();

    let config_path = match path {
        Some(p) if !p.exists() => {
            return Err(PipelineError::Config(format!("{} does not exist", p.display())))
        }
        Some(p) => Some(p.to_path_buf()),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };
    if let Some(config_path) = config_path {
        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            PipelineError::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    }

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        validate_config(&config).unwrap();
        assert_eq!(config.builder.batch_size, 20);
        assert_eq!(config.builder.call_delay_ms, 1000);
        assert_eq!(config.cleaner.min_output_len, 5);
        assert_eq!(config.llm.model, "meta-llama/llama-3-8b-instruct");
        assert_eq!(config.groups.len(), 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [parser]
            run_date = "2025-01-06"

            [builder]
            batch_size = 5

            [shuffle]
            seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.run_date(), NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        assert_eq!(config.builder.batch_size, 5);
        assert_eq!(config.builder.call_delay_ms, 1000);
        assert_eq!(config.shuffle.seed, Some(42));
        assert_eq!(config.paths.cleaned, PathBuf::from("data/cleaned_jsonl/final_cleaned.jsonl"));
    }

    #[test]
    fn test_groups_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [[groups]]
            name = "wire"
            output = "out/wire.csv"
            labeled_output = "out/wire_labeled.csv"
            sources = [{ path = "raw/wire.txt", grammar = "finviz_market" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].sources[0].grammar, SourceGrammar::FinvizMarket);
        assert!(!config.groups[0].extract_entities);
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = AppConfig::default();
        config.builder.batch_size = 0;
        config.llm.model = " ".into();
        config.groups.clear();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("builder.batch_size"));
        assert!(err.contains("llm.model"));
        assert!(err.contains("groups must contain"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/pipeline.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
