//! Append-mode cleaning of instruction datasets.
//!
//! The output file is the dedup memory: every run first reads the whole
//! output, then appends only records whose normalized `input` it has not seen.
//! Running the same batch twice therefore accepts nothing the second time.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use common::io::{lossy_line, open_append, read_bytes, read_lines, write_atomic};
use common::{InstructionRecord, PipelineError, WriterLock};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const DEFAULT_BOILERPLATE: &str = "Sign in to read exclusive news";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Inputs rejected outright, compared after normalization.
    pub boilerplate_inputs: Vec<String>,
    /// Minimum character count of the trimmed `output`.
    pub min_output_len: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            boilerplate_inputs: vec![DEFAULT_BOILERPLATE.to_string()],
            min_output_len: 5,
        }
    }
}

/// Collapse whitespace runs to one space and trim the ends.
pub fn normalize_input(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    Boilerplate,
    ShortOutput,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Accepted under this normalized input.
    Accept(String),
    Reject(RejectReason),
}

/// Quality and dedup filter. Accepting a record remembers its input.
#[derive(Debug)]
pub struct RecordFilter {
    config: CleanerConfig,
    boilerplate: HashSet<String>,
    seen: HashSet<String>,
}

impl RecordFilter {
    pub fn new(config: CleanerConfig) -> Self {
        let boilerplate = config
            .boilerplate_inputs
            .iter()
            .map(|b| normalize_input(b))
            .collect();
        Self {
            config,
            boilerplate,
            seen: HashSet::new(),
        }
    }

    /// Mark an input as already present downstream.
    pub fn remember(&mut self, input: &str) {
        let key = normalize_input(input);
        if !key.is_empty() {
            self.seen.insert(key);
        }
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn check(&mut self, input: &str, output: &str) -> Verdict {
        let key = normalize_input(input);
        if key.is_empty() {
            return Verdict::Reject(RejectReason::EmptyInput);
        }
        if self.boilerplate.contains(&key) {
            return Verdict::Reject(RejectReason::Boilerplate);
        }
        if output.trim().chars().count() < self.config.min_output_len {
            return Verdict::Reject(RejectReason::ShortOutput);
        }
        if !self.seen.insert(key.clone()) {
            return Verdict::Reject(RejectReason::Duplicate);
        }
        Verdict::Accept(key)
    }
}

/// Parse one dataset line, keeping any extra fields in their original order.
/// The line must be a JSON object whose `instruction`, `input` and `output`
/// are strings when present. A missing field reads as empty, so a record
/// without `input` is rejected by the filter rather than counted as malformed.
pub(crate) fn parse_line(line: &str) -> Result<Map<String, Value>, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let Value::Object(map) = value else {
        return Err("not a JSON object".to_string());
    };
    for field in ["instruction", "input", "output"] {
        if let Some(v) = map.get(field) {
            if !v.is_string() {
                return Err(format!("'{}' is not a string", field));
            }
        }
    }
    Ok(map)
}

fn str_field<'a>(map: &'a Map<String, Value>, field: &str) -> &'a str {
    map.get(field).and_then(Value::as_str).unwrap_or_default()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    /// Non-blank lines read from the new batch.
    pub processed: usize,
    pub accepted: usize,
    /// Well-formed records rejected by a quality or dedup rule.
    pub removed: usize,
    /// New lines that were not valid dataset records.
    pub malformed: usize,
    pub existing_records: usize,
    pub existing_malformed: usize,
    pub output: PathBuf,
}

/// Clean `new_records` into `output`, appending only new, acceptable records.
pub fn clean_into(
    new_records: &Path,
    output: &Path,
    config: &CleanerConfig,
) -> common::Result<CleanReport> {
    let incoming = read_lines(new_records)?;
    let _lock = WriterLock::acquire(output)?;

    let mut report = CleanReport {
        output: output.to_path_buf(),
        ..CleanReport::default()
    };
    let mut filter = RecordFilter::new(config.clone());

    if output.exists() {
        for (idx, line) in read_lines(output)?.into_iter().enumerate() {
            let parsed = match &line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => parse_line(line),
                Err(e) => Err(format!("invalid UTF-8: {}", lossy_line(e))),
            };
            match parsed {
                Ok(map) => {
                    filter.remember(str_field(&map, "input"));
                    report.existing_records += 1;
                }
                Err(reason) => {
                    warn!(
                        "Existing line {} in {} is malformed: {}",
                        idx + 1,
                        output.display(),
                        reason
                    );
                    report.existing_malformed += 1;
                }
            }
        }
    }

    let mut out = open_append(output)?;
    for (idx, line) in incoming.into_iter().enumerate() {
        let parsed = match &line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => parse_line(line),
            Err(e) => Err(format!("invalid UTF-8: {}", lossy_line(e))),
        };
        report.processed += 1;

        let mut map = match parsed {
            Ok(map) => map,
            Err(reason) => {
                warn!(
                    "Skipping malformed line {} in {}: {}",
                    idx + 1,
                    new_records.display(),
                    reason
                );
                report.malformed += 1;
                continue;
            }
        };

        let verdict = filter.check(str_field(&map, "input"), str_field(&map, "output"));
        match verdict {
            Verdict::Accept(normalized) => {
                map.insert("input".to_string(), Value::String(normalized));
                let mut encoded = serde_json::to_string(&map)?;
                encoded.push('\n');
                out.write_all(encoded.as_bytes())?;
                out.flush()?;
                report.accepted += 1;
            }
            Verdict::Reject(_) => report.removed += 1,
        }
    }
    out.sync_all()?;

    info!(
        "Cleaned {}: processed={} accepted={} removed={} malformed={} (existing={})",
        new_records.display(),
        report.processed,
        report.accepted,
        report.removed,
        report.malformed,
        report.existing_records
    );
    Ok(report)
}

#[derive(Debug, Default)]
pub struct CleanedBatch {
    pub accepted: Vec<InstructionRecord>,
    pub removed: Vec<(InstructionRecord, RejectReason)>,
}

/// In-memory form of [`clean_into`]: `existing` inputs count as already seen.
pub fn clean_records<'a, I>(
    existing: I,
    records: Vec<InstructionRecord>,
    config: &CleanerConfig,
) -> CleanedBatch
where
    I: IntoIterator<Item = &'a str>,
{
    let mut filter = RecordFilter::new(config.clone());
    for input in existing {
        filter.remember(input);
    }

    let mut batch = CleanedBatch::default();
    for mut record in records {
        match filter.check(&record.input, &record.output) {
            Verdict::Accept(normalized) => {
                record.input = normalized;
                batch.accepted.push(record);
            }
            Verdict::Reject(reason) => batch.removed.push((record, reason)),
        }
    }
    batch
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CsvCleanReport {
    pub processed: usize,
    pub accepted: usize,
    pub removed: usize,
    pub malformed: usize,
    pub output: PathBuf,
}

/// Clean an `instruction,input,output` CSV into a fresh file. All columns are
/// kept; `input` is normalized. The output is rewritten, not appended.
pub fn clean_csv(input: &Path, output: &Path, config: &CleanerConfig) -> common::Result<CsvCleanReport> {
    let raw = read_bytes(input)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw.as_slice());
    let headers = reader.headers()?.clone();

    let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let (input_idx, output_idx) = match (find("input"), find("output")) {
        (Some(i), Some(o)) => (i, o),
        _ => {
            return Err(PipelineError::Schema {
                path: input.to_path_buf(),
                message: "CSV dataset needs 'input' and 'output' columns".to_string(),
            })
        }
    };

    let mut report = CsvCleanReport {
        output: output.to_path_buf(),
        ..CsvCleanReport::default()
    };
    let mut filter = RecordFilter::new(config.clone());
    let mut kept = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        report.processed += 1;
        let row = match result {
            Ok(row) if row.len() == headers.len() => row,
            Ok(row) => {
                warn!("Skipping row {} in {}: {} fields, expected {}", idx + 2, input.display(), row.len(), headers.len());
                report.malformed += 1;
                continue;
            }
            Err(e) => {
                warn!("Skipping row {} in {}: {}", idx + 2, input.display(), e);
                report.malformed += 1;
                continue;
            }
        };

        let fields: Vec<String> = row.iter().map(ToString::to_string).collect();
        match filter.check(&fields[input_idx], &fields[output_idx]) {
            Verdict::Accept(normalized) => {
                let mut fields = fields;
                fields[input_idx] = normalized;
                kept.push(fields);
            }
            Verdict::Reject(_) => report.removed += 1,
        }
    }
    report.accepted = kept.len();

    write_atomic(output, |out| {
        let mut writer = WriterBuilder::new().from_writer(out);
        writer.write_record(&headers)?;
        for fields in &kept {
            writer.write_record(fields)?;
        }
        writer.flush()?;
        Ok(())
    })?;

    info!(
        "Cleaned CSV {} into {}: processed={} accepted={} removed={}",
        input.display(),
        output.display(),
        report.processed,
        report.accepted,
        report.removed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line(input: &str, output: &str) -> String {
        serde_json::to_string(&InstructionRecord {
            instruction: "Classify the sentiment expressed in this financial news headline.".into(),
            input: input.into(),
            output: output.into(),
        })
        .unwrap()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_normalize_input() {
        assert_eq!(normalize_input("  Markets   rally\n"), "Markets rally");
        assert_eq!(normalize_input("\t \n"), "");
    }

    #[test]
    fn test_output_length_threshold() {
        let mut filter = RecordFilter::new(CleanerConfig::default());
        assert_eq!(
            filter.check("Oil slides", " abcd "),
            Verdict::Reject(RejectReason::ShortOutput)
        );
        assert_eq!(
            filter.check("Oil slides", "abcde"),
            Verdict::Accept("Oil slides".into())
        );
    }

    #[test]
    fn test_boilerplate_and_duplicates() {
        let mut filter = RecordFilter::new(CleanerConfig::default());
        assert_eq!(
            filter.check("Sign in to  read exclusive news", "Sentiment: Neutral"),
            Verdict::Reject(RejectReason::Boilerplate)
        );
        assert_eq!(filter.check("   ", "Sentiment: Neutral"), Verdict::Reject(RejectReason::EmptyInput));
        assert!(matches!(filter.check("Fed holds", "Sentiment: Neutral"), Verdict::Accept(_)));
        assert_eq!(
            filter.check(" Fed   holds ", "Sentiment: Bullish"),
            Verdict::Reject(RejectReason::Duplicate)
        );
    }

    #[test]
    fn test_clean_into_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("converted.jsonl");
        let output = dir.path().join("cleaned/final_cleaned.jsonl");
        write_lines(
            &batch,
            &[
                line("  Markets   rally\n", "Sentiment: Bullish\nReason: Fed cut."),
                line("Markets rally", "Sentiment: Bullish\nReason: repeat."),
                line("Sign in to read exclusive news", "Sentiment: Neutral"),
                line("Oil slides", "Bad"),
                "{not json".to_string(),
                r#"{"instruction":"x","output":"Sentiment: Bearish"}"#.to_string(),
                String::new(),
            ],
        );

        let config = CleanerConfig::default();
        let first = clean_into(&batch, &output, &config).unwrap();
        assert_eq!(first.processed, 6);
        assert_eq!(first.accepted, 1);
        assert_eq!(first.removed, 4);
        assert_eq!(first.malformed, 1);

        let after_first = std::fs::read_to_string(&output).unwrap();
        let record: InstructionRecord = serde_json::from_str(after_first.lines().next().unwrap()).unwrap();
        assert_eq!(record.input, "Markets rally");

        let second = clean_into(&batch, &output, &config).unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(second.existing_records, 1);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), after_first);
        assert!(!common::lock::lock_path_for(&output).exists());
    }

    #[test]
    fn test_existing_malformed_lines_are_counted() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("batch.jsonl");
        let output = dir.path().join("out.jsonl");
        std::fs::write(&output, format!("{}\ngarbage\n{}", line("Fed holds", "Sentiment: Neutral"), "{\"input\":")).unwrap();
        write_lines(&batch, &[line("Fed holds", "Sentiment: Neutral"), line("Gold climbs", "Sentiment: Bullish")]);

        let report = clean_into(&batch, &output, &CleanerConfig::default()).unwrap();
        assert_eq!(report.existing_records, 1);
        assert_eq!(report.existing_malformed, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.removed, 1);

        let body = std::fs::read_to_string(&output).unwrap();
        let last = body.lines().last().unwrap();
        assert!(last.contains("Gold climbs"));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_missing_input_is_removed_and_wrong_types_are_malformed() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("batch.jsonl");
        let output = dir.path().join("out.jsonl");
        write_lines(
            &batch,
            &[
                r#"{"instruction":"i","output":"Sentiment: Neutral"}"#.to_string(),
                r#"{"instruction":"i","input":5,"output":"Sentiment: Neutral"}"#.to_string(),
                r#"["Fed holds","Sentiment: Neutral"]"#.to_string(),
            ],
        );

        let report = clean_into(&batch, &output, &CleanerConfig::default()).unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.removed, 1);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.accepted, 0);
    }

    #[test]
    fn test_invalid_utf8_lines_do_not_abort_cleaning() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("batch.jsonl");
        let output = dir.path().join("out.jsonl");

        let mut existing = line("Fed holds", "Sentiment: Neutral").into_bytes();
        existing.extend_from_slice(b"\n{\"input\":\"\xff\"}\n");
        std::fs::write(&output, existing).unwrap();

        let mut incoming = b"{\"input\":\"Oil \xff\"}\n".to_vec();
        incoming.extend_from_slice(line("Gold climbs", "Sentiment: Bullish").as_bytes());
        incoming.push(b'\n');
        std::fs::write(&batch, incoming).unwrap();

        let report = clean_into(&batch, &output, &CleanerConfig::default()).unwrap();
        assert_eq!(report.existing_records, 1);
        assert_eq!(report.existing_malformed, 1);
        assert_eq!(report.processed, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.accepted, 1);

        let body = std::fs::read(&output).unwrap();
        let last = String::from_utf8_lossy(&body).lines().last().unwrap().to_string();
        assert!(last.contains("Gold climbs"));
    }

    #[test]
    fn test_appended_lines_keep_field_order_and_extras() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("batch.jsonl");
        let output = dir.path().join("out.jsonl");
        write_lines(
            &batch,
            &[r#"{"instruction":"i","input":"  Fed   holds ","output":"Sentiment: Neutral","source":"finviz"}"#.to_string()],
        );

        clean_into(&batch, &output, &CleanerConfig::default()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "{\"instruction\":\"i\",\"input\":\"Fed holds\",\"output\":\"Sentiment: Neutral\",\"source\":\"finviz\"}\n"
        );
    }

    #[test]
    fn test_clean_into_refuses_locked_output() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("batch.jsonl");
        let output = dir.path().join("out.jsonl");
        write_lines(&batch, &[line("Fed holds", "Sentiment: Neutral")]);

        let _held = WriterLock::acquire(&output).unwrap();
        let err = clean_into(&batch, &output, &CleanerConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Locked { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_batch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.jsonl");
        let err = clean_into(&dir.path().join("nope.jsonl"), &output, &CleanerConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_clean_records_in_memory() {
        let records = vec![
            InstructionRecord { instruction: "i".into(), input: "Fed  holds".into(), output: "Sentiment: Neutral".into() },
            InstructionRecord { instruction: "i".into(), input: "Gold climbs".into(), output: "Sentiment: Bullish".into() },
        ];
        let batch = clean_records(["Fed holds"], records, &CleanerConfig::default());
        assert_eq!(batch.accepted.len(), 1);
        assert_eq!(batch.accepted[0].input, "Gold climbs");
        assert_eq!(batch.removed[0].1, RejectReason::Duplicate);
    }

    #[test]
    fn test_clean_csv_rewrites_and_keeps_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("dataset.csv");
        let output = dir.path().join("cleaned.csv");
        std::fs::write(
            &input,
            "instruction,Input,output,source\n\
             Classify.,\"  Fed   holds \",Sentiment: Neutral,finviz\n\
             Classify.,Fed holds,Sentiment: Neutral,tradingview\n\
             Classify.,Oil slides,meh,finviz\n",
        )
        .unwrap();
        std::fs::write(&output, "stale contents\n").unwrap();

        let report = clean_csv(&input, &output, &CleanerConfig::default()).unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.removed, 2);

        let body = std::fs::read_to_string(&output).unwrap();
        assert_eq!(body, "instruction,Input,output,source\nClassify.,Fed holds,Sentiment: Neutral,finviz\n");
    }

    #[test]
    fn test_clean_csv_requires_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("dataset.csv");
        std::fs::write(&input, "headline,sentiment\nFed holds,Neutral\n").unwrap();
        let err = clean_csv(&input, &dir.path().join("out.csv"), &CleanerConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }
}
