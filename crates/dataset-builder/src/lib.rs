//! Turns headlines into instruction-tuning records by asking a completion
//! service for a sentiment judgement under a randomly chosen instruction.

pub mod builder;
pub mod pacing;
pub mod prompt;
pub mod templates;

pub use builder::{BuildReport, BuildSummary, BuilderConfig, DatasetBuilder};
pub use pacing::CallPacer;
pub use prompt::{build_prompt, FALLBACK_OUTPUT};
pub use templates::{choose_instruction, INSTRUCTION_TEMPLATES};
