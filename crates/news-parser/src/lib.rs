//! Turns raw scraper dumps into canonical `NewsRecord`s.
//!
//! A single bad line never aborts a dump: it becomes a [`ParseFailure`],
//! is logged with its content, and is counted in the [`ParseReport`].

pub mod grammar;
pub mod tickers;

use std::path::Path;

use chrono::NaiveDate;
use common::io::{lossy_line, read_lines};
use common::NewsRecord;
use thiserror::Error;
use tracing::{info, warn};

pub use grammar::SourceGrammar;
pub use tickers::{extract_tickers, split_symbol_prefix};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {line}")]
pub struct ParseFailure {
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParseReport {
    pub records: Vec<NewsRecord>,
    pub failures: Vec<ParseFailure>,
}

impl ParseReport {
    pub fn parsed(&self) -> usize {
        self.records.len()
    }

    pub fn skipped(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub struct LineParser {
    run_date: NaiveDate,
}

impl LineParser {
    /// `run_date` stamps rows whose grammar carries no calendar date.
    pub fn new(run_date: NaiveDate) -> Self {
        Self { run_date }
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn parse_line(&self, line: &str, grammar: SourceGrammar) -> Result<NewsRecord, ParseFailure> {
        let trimmed = line.trim();
        let result = match grammar {
            SourceGrammar::TradingView | SourceGrammar::FinvizMarket => {
                let symbol_tickers = grammar == SourceGrammar::TradingView;
                grammar::parse_bracketed(trimmed, symbol_tickers)
                    .or_else(|| grammar::parse_dated_csv(trimmed))
                    .unwrap_or(Err("line matches neither bracketed nor dated grammar"))
            }
            SourceGrammar::FinvizStock => grammar::parse_stock_row(trimmed, self.run_date),
        };

        result.map_err(|reason| ParseFailure {
            line: trimmed.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Parse a whole dump in order. Blank lines are ignored.
    pub fn parse_lines<'a, I>(&self, lines: I, grammar: SourceGrammar) -> ParseReport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut report = ParseReport::default();
        for line in lines {
            self.accept(&mut report, line, grammar);
        }
        report
    }

    fn accept(&self, report: &mut ParseReport, line: &str, grammar: SourceGrammar) {
        if line.trim().is_empty() {
            return;
        }
        match self.parse_line(line, grammar) {
            Ok(record) => report.records.push(record),
            Err(failure) => {
                warn!("Skipping unmatched {} line ({}): {}", grammar, failure.reason, failure.line);
                report.failures.push(failure);
            }
        }
    }

    /// Parse a dump file. A missing file is fatal for the caller's stage; a
    /// line that is not valid UTF-8 is a failure like any other bad line.
    pub fn parse_file(&self, path: &Path, grammar: SourceGrammar) -> common::Result<ParseReport> {
        let mut report = ParseReport::default();
        for (idx, line) in read_lines(path)?.into_iter().enumerate() {
            match line {
                Ok(line) => self.accept(&mut report, &line, grammar),
                Err(e) => {
                    let failure = ParseFailure {
                        line: lossy_line(&e),
                        reason: format!("line {} is not valid UTF-8", idx + 1),
                    };
                    warn!("Skipping {} line ({}): {}", grammar, failure.reason, failure.line);
                    report.failures.push(failure);
                }
            }
        }
        info!(
            "Parsed {} headlines from {} ({} skipped)",
            report.parsed(),
            path.display(),
            report.skipped()
        );
        Ok(report)
    }
}
