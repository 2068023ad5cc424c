//! headline-pipeline: turns scraped market-news dumps into an instruction
//! dataset.
//!
//! Stages, each runnable on its own:
//! 1. Parse and merge raw dumps per source group
//! 2. Attach sentiment labels (and entity tickers) via the classifier service
//! 3. Generate instruction records through the completion service
//! 4. Clean into the append-only dataset with cross-run dedup
//! 5. Shuffle the cleaned dataset

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use headline_pipeline::{load_config, Pipeline};
use label_attacher::EntityExtractor;
use news_parser::SourceGrammar;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "headline_pipeline=info,news_parser=info,record_merger=info,\
label_attacher=info,llm_client=info,dataset_builder=info,dataset_cleaner=info,common=info";

/// Financial headline ingestion and instruction-dataset pipeline
#[derive(Parser)]
#[command(name = "headline-pipeline", about = "Financial headline dataset pipeline")]
struct Cli {
    /// Path to a TOML config file (default: ./config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a single raw dump into a headline table.
    Parse {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_parser = parse_grammar)]
        grammar: SourceGrammar,
        #[arg(long)]
        output: PathBuf,
    },
    /// Parse and merge every configured source group.
    Merge,
    /// Label merged tables with sentiment and merge the labeled tables.
    Label,
    /// Generate instruction records from the labeled table.
    Build,
    /// Clean the generated records into the final dataset.
    Clean {
        /// Clean an instruction,input,output CSV instead (rewrites OUTPUT).
        #[arg(long, num_args = 2, value_names = ["INPUT", "OUTPUT"])]
        csv: Option<Vec<PathBuf>>,
    },
    /// Shuffle the cleaned dataset.
    Shuffle,
    /// Run merge, label, build, clean and shuffle in order.
    Run {
        /// Stop after cleaning.
        #[arg(long)]
        no_shuffle: bool,
    },
}

fn parse_grammar(raw: &str) -> Result<SourceGrammar, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "tradingview" | "trading_view" => Ok(SourceGrammar::TradingView),
        "finviz_market" | "finviz-market" => Ok(SourceGrammar::FinvizMarket),
        "finviz_stock" | "finviz-stock" => Ok(SourceGrammar::FinvizStock),
        other => Err(format!(
            "unknown grammar '{}' (expected tradingview, finviz_market or finviz_stock)",
            other
        )),
    }
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config.as_deref())?;
    info!("Loaded configuration: {} source group(s), model {}", config.groups.len(), config.llm.model);

    let mut pipeline = Pipeline::new(config)?;
    info!("Run id {}", pipeline.run_id());

    match cli.command {
        Command::Parse { input, grammar, output } => pipeline.parse(&input, grammar, &output)?,
        Command::Merge => pipeline.merge()?,
        Command::Label => {
            let classifier = pipeline.classifier()?;
            let extractor = pipeline.entity_extractor()?;
            pipeline
                .label(&classifier, extractor.as_ref().map(|e| e as &dyn EntityExtractor))
                .await?
        }
        Command::Build => {
            let service = pipeline.completion_service()?;
            pipeline.build(service).await?
        }
        Command::Clean { csv: Some(paths) } => pipeline.clean_csv(&paths[0], &paths[1])?,
        Command::Clean { csv: None } => pipeline.clean()?,
        Command::Shuffle => pipeline.shuffle()?,
        Command::Run { no_shuffle } => pipeline.run(!no_shuffle).await?,
    }

    Ok(())
}
