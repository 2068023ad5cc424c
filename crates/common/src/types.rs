//! Record types flowing between pipeline stages.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// `Mon-DD-YYYY`, e.g. `Jan-05-2025`.
pub const CANONICAL_DATE_FORMAT: &str = "%b-%d-%Y";

pub fn canonical_date(date: NaiveDate) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

/// One parsed headline. Created once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewsRecord {
    pub date: String,
    pub provider: String,
    pub headline: String,
    /// Heuristically extracted; see `news_parser::tickers`.
    #[serde(default)]
    pub tickers: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    /// Classifier class order: 0 = negative, 1 = positive, 2 = neutral.
    pub fn from_class_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Sentiment::Bearish),
            1 => Some(Sentiment::Bullish),
            2 => Some(Sentiment::Neutral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "Bullish",
            Sentiment::Bearish => "Bearish",
            Sentiment::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(Sentiment::Bullish),
            "bearish" => Ok(Sentiment::Bearish),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(format!(
                "unknown sentiment '{}'; expected Bullish|Bearish|Neutral",
                other
            )),
        }
    }
}

/// A `NewsRecord` decorated by the external classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledRecord {
    #[serde(flatten)]
    pub record: NewsRecord,
    pub sentiment: Sentiment,
}

/// One fine-tuning example. Missing fields deserialize as empty strings so the
/// cleaner can filter them instead of treating the line as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionRecord {
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

/// Anything the dataset builder can turn into an instruction record.
pub trait HasHeadline {
    fn headline(&self) -> &str;
}

impl HasHeadline for NewsRecord {
    fn headline(&self) -> &str {
        &self.headline
    }
}

impl HasHeadline for LabeledRecord {
    fn headline(&self) -> &str {
        &self.record.headline
    }
}

impl HasHeadline for String {
    fn headline(&self) -> &str {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_index_mapping() {
        assert_eq!(Sentiment::from_class_index(0), Some(Sentiment::Bearish));
        assert_eq!(Sentiment::from_class_index(1), Some(Sentiment::Bullish));
        assert_eq!(Sentiment::from_class_index(2), Some(Sentiment::Neutral));
        assert_eq!(Sentiment::from_class_index(3), None);
    }

    #[test]
    fn test_sentiment_parse_is_case_insensitive() {
        assert_eq!("bullish".parse::<Sentiment>(), Ok(Sentiment::Bullish));
        assert_eq!(" NEUTRAL ".parse::<Sentiment>(), Ok(Sentiment::Neutral));
        assert!("Unknown".parse::<Sentiment>().is_err());
    }

    #[test]
    fn test_canonical_date_zero_pads_day() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(canonical_date(date), "Jan-05-2025");
    }

    #[test]
    fn test_instruction_record_missing_fields_default_empty() {
        let record: InstructionRecord = serde_json::from_str(r#"{"output":"Sentiment: Bullish"}"#).unwrap();
        assert_eq!(record.input, "");
        assert_eq!(record.instruction, "");
    }
}
