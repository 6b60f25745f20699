//! Append-only dataset files.
//!
//! Exchanges can be saved either as one record per message or as a
//! snapshot of a whole dialog, in CSV or JSON-lines framing. Files are only
//! ever opened for append; existing content is never rewritten.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::db::{EntryKind, HistoryEntry};
use crate::fanout::now_str;

const LINES_HEADER: [&str; 5] = ["timestamp", "session_id", "provider", "message", "type"];
const DIALOG_HEADER: [&str; 3] = ["session_id", "saved_at", "dialog_json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    JsonLines,
}

impl DatasetFormat {
    /// `csv` selects CSV; anything else selects JSON lines.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("csv") {
            Self::Csv
        } else {
            Self::JsonLines
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => ".csv",
            Self::JsonLines => ".json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetShape {
    Lines,
    Dialog,
}

impl DatasetShape {
    /// `dialog` selects a snapshot; anything else selects per-message lines.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("dialog") {
            Self::Dialog
        } else {
            Self::Lines
        }
    }
}

/// One message destined for a line-shaped dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub provider: String,
    pub message: String,
    pub timestamp: String,
    pub kind: EntryKind,
}

#[derive(Serialize)]
struct LineRecord<'a> {
    timestamp: &'a str,
    session_id: &'a str,
    provider: &'a str,
    message: &'a str,
    #[serde(rename = "type")]
    kind: EntryKind,
}

#[derive(Serialize)]
struct DialogRecord<'a> {
    session_id: &'a str,
    dialog: &'a [HistoryEntry],
    saved_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    /// Create an exporter writing under `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create dataset dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Destination for a caller-supplied name, or a time-based name when
    /// none is given. Path separators in the name are replaced.
    pub fn path_for(&self, filename: Option<&str>, format: DatasetFormat) -> PathBuf {
        let name = filename.map(str::trim).unwrap_or("");
        let safe_name = if name.is_empty() {
            format!("dataset_{}", chrono::Utc::now().timestamp())
        } else {
            sanitize_name(name)
        };
        self.dir.join(format!("{safe_name}{}", format.extension()))
    }

    pub fn export_lines(
        &self,
        path: &Path,
        session_id: &str,
        format: DatasetFormat,
        entries: &[DatasetEntry],
    ) -> Result<()> {
        let mut out = String::new();
        match format {
            DatasetFormat::Csv => {
                if !path.exists() {
                    out.push_str(&csv_record(&LINES_HEADER));
                }
                for e in entries {
                    out.push_str(&csv_record(&[
                        e.timestamp.as_str(),
                        session_id,
                        e.provider.as_str(),
                        e.message.as_str(),
                        e.kind.as_str(),
                    ]));
                }
            }
            DatasetFormat::JsonLines => {
                for e in entries {
                    let record = LineRecord {
                        timestamp: &e.timestamp,
                        session_id,
                        provider: &e.provider,
                        message: &e.message,
                        kind: e.kind,
                    };
                    out.push_str(&serde_json::to_string(&record)?);
                    out.push('\n');
                }
            }
        }
        append(path, &out)?;
        tracing::debug!(path = %path.display(), records = entries.len(), "Appended dataset lines");
        Ok(())
    }

    pub fn export_dialog(
        &self,
        path: &Path,
        session_id: &str,
        format: DatasetFormat,
        dialog: &[HistoryEntry],
    ) -> Result<()> {
        let saved_at = now_str();
        let mut out = String::new();
        match format {
            DatasetFormat::Csv => {
                if !path.exists() {
                    out.push_str(&csv_record(&DIALOG_HEADER));
                }
                let dialog_json = serde_json::to_string(dialog)?;
                out.push_str(&csv_record(&[session_id, saved_at.as_str(), dialog_json.as_str()]));
            }
            DatasetFormat::JsonLines => {
                let record = DialogRecord {
                    session_id,
                    dialog,
                    saved_at: &saved_at,
                };
                out.push_str(&serde_json::to_string(&record)?);
                out.push('\n');
            }
        }
        append(path, &out)?;
        tracing::debug!(path = %path.display(), turns = dialog.len(), "Appended dataset dialog");
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Single append write so a batch lands contiguously.
fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}

/// One CSV record, CRLF-terminated. Fields holding a delimiter, quote or
/// line break are quoted with embedded quotes doubled.
fn csv_record(fields: &[&str]) -> String {
    let escaped: Vec<String> = fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.to_string()
            }
        })
        .collect();
    format!("{}\r\n", escaped.join(","))
}
