//! CSV tables at stage boundaries.
//!
//! Headers are validated before any row is read: a file missing a required
//! column is rejected with `PipelineError::Schema` instead of failing later on
//! field access. Header lookup ignores case since older dumps wrote
//! `Headline` rather than `headline`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::warn;

use crate::io::{read_bytes, write_atomic};
use crate::types::{LabeledRecord, NewsRecord, Sentiment};
use crate::{PipelineError, Result};

/// Named access into one CSV row.
pub struct RowView<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a StringRecord,
}

impl<'a> RowView<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .get(column)
            .and_then(|idx| self.record.get(*idx))
    }

    pub fn required(&self, column: &str) -> std::result::Result<&'a str, String> {
        self.get(column)
            .ok_or_else(|| format!("row has no value for column '{}'", column))
    }
}

pub trait TableRow: Sized {
    /// Columns written, in order.
    const COLUMNS: &'static [&'static str];
    /// Columns a file must carry to be readable.
    const REQUIRED: &'static [&'static str];

    fn to_row(&self) -> Vec<String>;
    fn from_row(row: &RowView<'_>) -> std::result::Result<Self, String>;
}

/// Rows that parsed plus rows that did not (1-based line number, reason).
#[derive(Debug)]
pub struct TableRead<T> {
    pub rows: Vec<T>,
    pub malformed: Vec<(usize, String)>,
}

pub fn format_tickers(tickers: &BTreeSet<String>) -> String {
    tickers.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Accepts `A, B` as written by this pipeline and `['A', 'B']` list literals
/// found in older scraper output.
pub fn parse_tickers(raw: &str) -> BTreeSet<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|t| t.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl TableRow for NewsRecord {
    const COLUMNS: &'static [&'static str] = &["date", "provider", "headline", "tickers"];
    const REQUIRED: &'static [&'static str] = &["date", "provider", "headline"];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.provider.clone(),
            self.headline.clone(),
            format_tickers(&self.tickers),
        ]
    }

    fn from_row(row: &RowView<'_>) -> std::result::Result<Self, String> {
        Ok(NewsRecord {
            date: row.required("date")?.trim().to_string(),
            provider: row.required("provider")?.trim().to_string(),
            headline: row.required("headline")?.trim().to_string(),
            tickers: row.get("tickers").map(parse_tickers).unwrap_or_default(),
        })
    }
}

impl TableRow for LabeledRecord {
    const COLUMNS: &'static [&'static str] =
        &["date", "provider", "headline", "tickers", "sentiment"];
    const REQUIRED: &'static [&'static str] = &["date", "provider", "headline", "sentiment"];

    fn to_row(&self) -> Vec<String> {
        let mut row = self.record.to_row();
        row.push(self.sentiment.to_string());
        row
    }

    fn from_row(row: &RowView<'_>) -> std::result::Result<Self, String> {
        Ok(LabeledRecord {
            record: NewsRecord::from_row(row)?,
            sentiment: row.required("sentiment")?.parse::<Sentiment>()?,
        })
    }
}

fn header_index(path: &Path, headers: &StringRecord, required: &[&str]) -> Result<HashMap<String, usize>> {
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
        .collect();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|col| !columns.contains_key(*col))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::Schema {
            path: path.to_path_buf(),
            message: format!("missing required column(s): {}", missing.join(", ")),
        });
    }
    Ok(columns)
}

/// Read a headed CSV table, validating the header against `T::REQUIRED`.
pub fn read_table<T: TableRow>(path: &Path) -> Result<TableRead<T>> {
    read_table_with(path, T::REQUIRED, T::from_row)
}

/// Like [`read_table`] but with an explicit column requirement and row
/// decoder, for callers that only need part of a table.
pub fn read_table_with<T, F>(path: &Path, required: &[&str], decode: F) -> Result<TableRead<T>>
where
    F: Fn(&RowView<'_>) -> std::result::Result<T, String>,
{
    let raw = read_bytes(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw.as_slice());

    let headers = reader.headers()?.clone();
    let columns = header_index(path, &headers, required)?;

    let mut rows = Vec::new();
    let mut malformed = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable row {} in {}: {}", line, path.display(), e);
                malformed.push((line, e.to_string()));
                continue;
            }
        };
        let view = RowView {
            columns: &columns,
            record: &record,
        };
        match decode(&view) {
            Ok(row) => rows.push(row),
            Err(reason) => {
                warn!("Skipping malformed row {} in {}: {}", line, path.display(), reason);
                malformed.push((line, reason));
            }
        }
    }

    Ok(TableRead { rows, malformed })
}

/// Overwrite `path` with a headed CSV table.
pub fn write_table<T: TableRow>(path: &Path, rows: &[T]) -> Result<()> {
    write_atomic(path, |out| {
        let mut writer = WriterBuilder::new().from_writer(out);
        writer.write_record(T::COLUMNS)?;
        for row in rows {
            writer.write_record(row.to_row())?;
        }
        writer.flush()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(headline: &str, tickers: &[&str]) -> NewsRecord {
        NewsRecord {
            date: "Jan-05-2025".into(),
            provider: "Reuters".into(),
            headline: headline.into(),
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_news_table_round_trip_keeps_commas_in_headlines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("news.csv");
        let rows = vec![
            record("Fed holds, markets shrug", &["FED"]),
            record("AAPL and MSFT slip", &["AAPL", "MSFT"]),
        ];
        write_table(&path, &rows).unwrap();

        let read = read_table::<NewsRecord>(&path).unwrap();
        assert_eq!(read.rows, rows);
        assert!(read.malformed.is_empty());
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "date,headline\nJan-05-2025,Stocks up\n").unwrap();

        match read_table::<NewsRecord>(&path) {
            Err(PipelineError::Schema { message, .. }) => assert!(message.contains("provider")),
            other => panic!("expected schema error, got {:?}", other.map(|r| r.rows)),
        }
    }

    #[test]
    fn test_header_lookup_ignores_case_and_tickers_optional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.csv");
        std::fs::write(&path, "Date,Provider,Headline\nJan-05-2025,Zacks,Tech stocks surge\n").unwrap();

        let read = read_table::<NewsRecord>(&path).unwrap();
        assert_eq!(read.rows[0].provider, "Zacks");
        assert!(read.rows[0].tickers.is_empty());
    }

    #[test]
    fn test_bad_sentiment_row_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("labeled.csv");
        std::fs::write(
            &path,
            "date,provider,headline,tickers,sentiment\n\
             Jan-05-2025,Zacks,Tech stocks surge,,Bullish\n\
             Jan-05-2025,Zacks,Oil slides,,Sideways\n",
        )
        .unwrap();

        let read = read_table::<LabeledRecord>(&path).unwrap();
        assert_eq!(read.rows.len(), 1);
        assert_eq!(read.malformed.len(), 1);
        assert_eq!(read.malformed[0].0, 3);
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("news.csv");
        std::fs::write(
            &path,
            b"date,provider,headline\nJan-05-2025,Reuters,Bad \xff byte\nJan-05-2025,Zacks,Tech stocks surge\n",
        )
        .unwrap();

        let read = read_table::<NewsRecord>(&path).unwrap();
        assert_eq!(read.rows.len(), 1);
        assert_eq!(read.rows[0].provider, "Zacks");
        assert_eq!(read.malformed.len(), 1);
        assert_eq!(read.malformed[0].0, 2);
    }

    #[test]
    fn test_parse_tickers_accepts_list_literal() {
        let parsed = parse_tickers("['NVDA', 'AMD']");
        assert_eq!(parsed.into_iter().collect::<Vec<_>>(), vec!["AMD", "NVDA"]);
    }
}
