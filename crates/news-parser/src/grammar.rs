//! Line grammars of the scraped dumps.

use std::sync::OnceLock;

use chrono::NaiveDate;
use common::{canonical_date, NewsRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tickers::{extract_tickers, split_symbol_prefix};

/// Which scraper produced a dump, and therefore which grammar its lines use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGrammar {
    /// `[Mon DD, YYYY, time] (provider) headline`, falling back to the
    /// comma-separated form.
    #[serde(rename = "tradingview")]
    TradingView,
    /// `Mon-DD-YYYY, provider, headline`, falling back to the bracketed form.
    FinvizMarket,
    /// `time, provider, headline[, tickers]`, dated with the run date.
    FinvizStock,
}

impl std::fmt::Display for SourceGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceGrammar::TradingView => write!(f, "tradingview"),
            SourceGrammar::FinvizMarket => write!(f, "finviz_market"),
            SourceGrammar::FinvizStock => write!(f, "finviz_stock"),
        }
    }
}

fn bracketed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[(\w{3} \d{1,2}, \d{4}), [^\]]+\] \((.*?)\) (.+)$")
            .expect("valid bracketed pattern")
    })
}

fn dated_csv_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\w{3}-\d{2}-\d{4}),\s([^,]+),\s(.+)$").expect("valid dated pattern")
    })
}

/// `Jan 5, 2025` -> `Jan-05-2025`; unexpected text is returned unchanged.
pub fn reformat_bracketed_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw, "%b %d, %Y") {
        Ok(date) => canonical_date(date),
        Err(_) => raw.to_string(),
    }
}

fn build_record(
    date: String,
    provider: &str,
    headline: &str,
    tickers: std::collections::BTreeSet<String>,
) -> Result<NewsRecord, &'static str> {
    let provider = provider.trim();
    let headline = headline.trim();
    if provider.is_empty() {
        return Err("empty provider");
    }
    if headline.is_empty() {
        return Err("empty headline");
    }
    Ok(NewsRecord {
        date,
        provider: provider.to_string(),
        headline: headline.to_string(),
        tickers,
    })
}

fn is_ticker(symbol: &str) -> bool {
    (1..=5).contains(&symbol.len()) && symbol.bytes().all(|b| b.is_ascii_uppercase())
}

/// Grammar A. `None` when the line does not have the bracketed shape.
///
/// The headline is always capture 3 as written. With `symbol_tickers`, a
/// leading symbol prefix is recorded as a ticker when it is one to five
/// capital letters; pairs such as `BTC/USD` are ignored.
pub fn parse_bracketed(line: &str, symbol_tickers: bool) -> Option<Result<NewsRecord, &'static str>> {
    let caps = bracketed_pattern().captures(line)?;
    let date = reformat_bracketed_date(&caps[1]);
    let provider = &caps[2];
    let headline = &caps[3];

    let mut tickers = std::collections::BTreeSet::new();
    if symbol_tickers {
        if let (Some(symbol), _) = split_symbol_prefix(headline) {
            if is_ticker(&symbol) {
                tickers.insert(symbol);
            }
        }
    }
    Some(build_record(date, provider, headline, tickers))
}

/// Grammar B. `None` when the line does not have the dated comma shape.
pub fn parse_dated_csv(line: &str) -> Option<Result<NewsRecord, &'static str>> {
    let caps = dated_csv_pattern().captures(line)?;
    Some(build_record(
        caps[1].to_string(),
        &caps[2],
        &caps[3],
        Default::default(),
    ))
}

/// Finviz stock-news rows carry only a time of day, so they are dated with the
/// run date. The trailing scraped ticker column is ignored in favour of the
/// headline heuristic.
pub fn parse_stock_row(line: &str, run_date: NaiveDate) -> Result<NewsRecord, &'static str> {
    let parts: Vec<&str> = line.splitn(4, ", ").collect();
    if parts.len() < 3 {
        return Err("expected at least 3 comma-separated fields");
    }
    let headline = parts[2].trim();
    build_record(
        canonical_date(run_date),
        parts[1],
        headline,
        extract_tickers(headline),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reformat_bracketed_date_pads_day() {
        assert_eq!(reformat_bracketed_date("Jan 5, 2025"), "Jan-05-2025");
        assert_eq!(reformat_bracketed_date("Dec 31, 2024"), "Dec-31-2024");
    }

    #[test]
    fn test_reformat_bracketed_date_falls_back_to_raw_text() {
        // Matches the \w{3} shape but is not a month.
        assert_eq!(reformat_bracketed_date("Foo 5, 2025"), "Foo 5, 2025");
    }

    #[test]
    fn test_bracketed_keeps_raw_date_when_unparseable() {
        let record = parse_bracketed("[Foo 5, 2025, 10:30AM] (Reuters) Odd date", false)
            .unwrap()
            .unwrap();
        assert_eq!(record.date, "Foo 5, 2025");
        assert_eq!(record.headline, "Odd date");
    }

    #[test]
    fn test_bracketed_headline_never_cut_by_symbol_prefix() {
        let record = parse_bracketed("[Jan 5, 2025, 10:30AM] (Reuters) BTC/USD:soars past record", true)
            .unwrap()
            .unwrap();
        assert_eq!(record.headline, "BTC/USD:soars past record");
        assert!(record.tickers.is_empty());

        let record = parse_bracketed("[Jan 5, 2025, 10:30AM] (Reuters) BTC:soars past 100k", true)
            .unwrap()
            .unwrap();
        assert_eq!(record.headline, "BTC:soars past 100k");
        assert_eq!(record.tickers.into_iter().collect::<Vec<_>>(), vec!["BTC"]);
    }

    #[test]
    fn test_bracketed_rejects_empty_provider() {
        let result = parse_bracketed("[Jan 5, 2025, 10:30AM] () Headline", false).unwrap();
        assert_eq!(result, Err("empty provider"));
    }

    #[test]
    fn test_dated_csv_trims_provider() {
        let record = parse_dated_csv("Mar-14-2025,  Bloomberg , Yields climb")
            .unwrap()
            .unwrap();
        assert_eq!(record.provider, "Bloomberg");
        assert_eq!(record.date, "Mar-14-2025");
    }

    #[test]
    fn test_stock_row_uses_run_date_and_headline_tickers() {
        let run_date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let record = parse_stock_row(
            "09:45AM, Motley Fool, Why NVDA stock jumped today, NVDA, AMD",
            run_date,
        )
        .unwrap();
        assert_eq!(record.date, "Jun-02-2025");
        assert_eq!(record.provider, "Motley Fool");
        assert_eq!(record.headline, "Why NVDA stock jumped today");
        assert_eq!(
            record.tickers.into_iter().collect::<Vec<_>>(),
            vec!["NVDA", "W"]
        );
    }

    #[test]
    fn test_stock_row_needs_three_fields() {
        let run_date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert!(parse_stock_row("09:45AM, Motley Fool", run_date).is_err());
    }
}
