pub mod client;
pub mod types;

pub use client::{CompletionService, OpenRouterClient, OPENROUTER_API_URL};
pub use types::*;
