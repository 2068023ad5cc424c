use std::io::Write;
use std::path::{Path, PathBuf};

use common::io::{lossy_line, read_lines, require_input, write_atomic};
use common::{PipelineError, WriterLock};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::cleaner::parse_line;

#[derive(Debug, Clone, Serialize)]
pub struct ShuffleReport {
    pub records: usize,
    pub output: PathBuf,
}

pub fn shuffle_records<T, R: Rng>(records: &mut [T], rng: &mut R) {
    records.shuffle(rng);
}

/// Permute a cleaned dataset into `output`. Every non-blank line must be a
/// dataset record; the lines themselves are written back byte for byte. The
/// input is held under its writer lock while read so a concurrent cleaner
/// cannot be mid-append.
pub fn shuffle_file<R: Rng>(input: &Path, output: &Path, rng: &mut R) -> common::Result<ShuffleReport> {
    require_input(input)?;
    let _lock = WriterLock::acquire(input)?;

    let mut lines = Vec::new();
    for (idx, line) in read_lines(input)?.into_iter().enumerate() {
        let malformed = |message: String| PipelineError::Malformed {
            path: input.to_path_buf(),
            line: idx + 1,
            message,
        };
        let line = line.map_err(|e| malformed(format!("invalid UTF-8: {}", lossy_line(&e))))?;
        if line.trim().is_empty() {
            continue;
        }
        parse_line(&line).map_err(malformed)?;
        lines.push(line);
    }

    shuffle_records(&mut lines, rng);
    write_atomic(output, |w| {
        for line in &lines {
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
        }
        Ok(())
    })?;

    info!("Shuffled {} records from {} into {}", lines.len(), input.display(), output.display());
    Ok(ShuffleReport {
        records: lines.len(),
        output: output.to_path_buf(),
    })
}
