//! File helpers shared by every stage.
//!
//! Whole-file outputs go through [`write_atomic`]: the content lands in a
//! sibling `.partial` file first and is renamed over the target only once it is
//! complete, so an aborted stage never exposes half-written records.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;

use serde::Serialize;

use crate::{PipelineError, Result};

/// Fail with `MissingInput` before a stage touches anything else.
pub fn require_input(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput(path.to_path_buf()))
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    require_input(path)?;
    Ok(std::fs::read(path)?)
}

/// One line of a text file, decoded on its own.
pub type DecodedLine = std::result::Result<String, FromUtf8Error>;

/// Read `path` as lines, decoding each one separately so an invalid byte only
/// spoils its own line. `\n` and `\r\n` endings are stripped.
pub fn read_lines(path: &Path) -> Result<Vec<DecodedLine>> {
    Ok(split_lines(&read_bytes(path)?))
}

pub fn split_lines(raw: &[u8]) -> Vec<DecodedLine> {
    let body = raw.strip_suffix(b"\n").unwrap_or(raw);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|b| *b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8(line.to_vec())
        })
        .collect()
}

/// Lossy rendering of an undecodable line, for logs and reports.
pub fn lossy_line(err: &FromUtf8Error) -> String {
    String::from_utf8_lossy(err.as_bytes()).into_owned()
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write a whole file through a temporary sibling and rename it into place.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    ensure_parent_dir(path)?;
    let tmp = partial_path(path);
    let result = (|| -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn to_json_line<T: Serialize>(record: &T) -> Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

/// Overwrite `path` with one JSON object per line.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    write_atomic(path, |out| {
        for record in records {
            out.write_all(to_json_line(record)?.as_bytes())?;
        }
        Ok(())
    })
}

/// Open `path` for appending whole lines. If a previous writer died mid-line the
/// dangling fragment is terminated first so the next record starts on its own
/// line.
pub fn open_append(path: &Path) -> Result<File> {
    ensure_parent_dir(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            tracing::warn!(
                "{} did not end with a newline; terminating the trailing fragment",
                path.display()
            );
            file.write_all(b"\n")?;
            file.flush()?;
        }
    }
    Ok(file)
}
