//! Final dataset stages: append-mode cleaning with cross-run dedup, and
//! seeded shuffling of the cleaned file.

pub mod cleaner;
pub mod shuffle;

pub use cleaner::{
    clean_csv, clean_into, clean_records, normalize_input, CleanReport, CleanedBatch,
    CleanerConfig, CsvCleanReport, RecordFilter, RejectReason, Verdict, DEFAULT_BOILERPLATE,
};
pub use shuffle::{shuffle_file, shuffle_records, ShuffleReport};
