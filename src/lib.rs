//! Headline ingestion pipeline: scraped dumps to a cleaned, shuffled
//! instruction-tuning dataset.

pub mod config;
pub mod journal;
pub mod pipeline;

pub use config::{load_config, AppConfig};
pub use pipeline::Pipeline;
