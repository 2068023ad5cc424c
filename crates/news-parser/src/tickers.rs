//! Ticker heuristics.
//!
//! Neither routine validates against a symbol list. `extract_tickers` treats
//! every run of one to five capitals as a ticker, which also picks up
//! sentence-initial capitals, acronyms and five-letter slices of longer
//! capitalised words. That is the behaviour downstream tables were built with,
//! so it is kept as-is.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

fn ticker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Z]{1,5}").expect("valid ticker pattern"))
}

/// The TradingView symbol prefix pattern as the scraper shipped it: the `s+`
/// after the colon is a literal `s`, not whitespace, so headlines such as
/// `"AAPL: Apple beats"` do not match.
fn symbol_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z\-/.]+):s+").expect("valid symbol pattern"))
}

pub fn extract_tickers(headline: &str) -> BTreeSet<String> {
    ticker_pattern()
        .find_iter(headline)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Best-effort split of a leading `SYMBOL:` from a TradingView headline.
/// Returns the symbol (if any) and the remaining headline text. An empty result
/// is the common case.
pub fn split_symbol_prefix(headline: &str) -> (Option<String>, &str) {
    match symbol_prefix_pattern().captures(headline) {
        Some(caps) => {
            let symbol = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty());
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (symbol, headline[end..].trim())
        }
        None => (None, headline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_tickers_collapses_duplicates() {
        assert_eq!(extract_tickers("AMD beats, AMD rallies"), set(&["AMD"]));
    }

    #[test]
    fn test_extract_tickers_keeps_known_false_positives() {
        // Sentence-initial capitals and acronyms are picked up too.
        assert_eq!(
            extract_tickers("Markets rally as NVDA tops CEO forecast"),
            set(&["CEO", "M", "NVDA"])
        );
        // Long capitalised words are sliced into five-letter chunks.
        assert_eq!(extract_tickers("NVIDIA"), set(&["A", "NVIDI"]));
    }

    #[test]
    fn test_extract_tickers_empty_for_lowercase() {
        assert!(extract_tickers("stocks drift lower").is_empty());
    }

    #[test]
    fn test_symbol_prefix_does_not_match_colon_space() {
        let (symbol, rest) = split_symbol_prefix("AAPL: Apple beats estimates");
        assert_eq!(symbol, None);
        assert_eq!(rest, "AAPL: Apple beats estimates");
    }

    #[test]
    fn test_symbol_prefix_matches_literal_s_after_colon() {
        // Current behaviour: the `s` is consumed as part of the separator.
        let (symbol, rest) = split_symbol_prefix("BTC:soars past 100k");
        assert_eq!(symbol.as_deref(), Some("BTC"));
        assert_eq!(rest, "oars past 100k");
    }
}
