//! Combines record tables from several sources into one table.
//!
//! Merging is a full recompute: prior merge output is never consulted and the
//! output file is overwritten on every call. Only rows identical in every
//! column are duplicates; the first occurrence wins and relative order is
//! otherwise preserved.

use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use common::{read_table, write_table, TableRow};
use news_parser::{LineParser, SourceGrammar};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone)]
pub struct MergeReport<T> {
    pub rows: Vec<T>,
    pub input_rows: usize,
    pub duplicates_removed: usize,
}

/// One raw dump and the grammar its lines follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpSource {
    pub path: PathBuf,
    pub grammar: SourceGrammar,
}

/// Outcome of a file-level merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeSummary {
    pub input_rows: usize,
    pub rows_written: usize,
    pub duplicates_removed: usize,
    /// Lines the parser could not read (dump merges) or rows that failed to
    /// decode (table merges).
    pub skipped: usize,
    pub output: PathBuf,
}

pub fn merge_tables<T, I>(tables: I) -> MergeReport<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = Vec<T>>,
{
    let mut seen: HashSet<T> = HashSet::new();
    let mut rows = Vec::new();
    let mut input_rows = 0usize;

    for table in tables {
        for row in table {
            input_rows += 1;
            if seen.insert(row.clone()) {
                rows.push(row);
            }
        }
    }

    let duplicates_removed = input_rows - rows.len();
    MergeReport {
        rows,
        input_rows,
        duplicates_removed,
    }
}

fn write_merged<T: TableRow>(
    report: MergeReport<T>,
    skipped: usize,
    output: &Path,
) -> common::Result<MergeSummary> {
    write_table(output, &report.rows)?;
    let summary = MergeSummary {
        input_rows: report.input_rows,
        rows_written: report.rows.len(),
        duplicates_removed: report.duplicates_removed,
        skipped,
        output: output.to_path_buf(),
    };
    info!(
        "Merged {} rows into {} ({} duplicates removed, {} skipped)",
        summary.rows_written,
        output.display(),
        summary.duplicates_removed,
        summary.skipped
    );
    Ok(summary)
}

/// Parse every dump and merge the results. All inputs are read before the
/// output is written, so a missing dump leaves the previous output untouched.
pub fn merge_dumps(
    parser: &LineParser,
    sources: &[DumpSource],
    output: &Path,
) -> common::Result<MergeSummary> {
    let mut tables = Vec::with_capacity(sources.len());
    let mut skipped = 0usize;
    for source in sources {
        let report = parser.parse_file(&source.path, source.grammar)?;
        skipped += report.skipped();
        tables.push(report.records);
    }
    write_merged(merge_tables(tables), skipped, output)
}

/// Merge already-written tables of the same row type.
pub fn merge_table_files<T>(inputs: &[PathBuf], output: &Path) -> common::Result<MergeSummary>
where
    T: TableRow + Eq + Hash + Clone,
{
    let mut tables = Vec::with_capacity(inputs.len());
    let mut skipped = 0usize;
    for input in inputs {
        let read = read_table::<T>(input)?;
        skipped += read.malformed.len();
        tables.push(read.rows);
    }
    write_merged(merge_tables(tables), skipped, output)
}
