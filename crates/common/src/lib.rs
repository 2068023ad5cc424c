//! Shared record types, file-boundary IO, and error definitions for the
//! headline pipeline.

pub mod error;
pub mod io;
pub mod lock;
pub mod table;
pub mod types;

pub use error::PipelineError;
pub use lock::WriterLock;
pub use table::{read_table, write_table, TableRead, TableRow};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
