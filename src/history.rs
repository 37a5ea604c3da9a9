//! Append-only ledger of exact-duplicate removals, one JSON record per line,
//! so archived files can be moved back later.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HISTORY_FILE_NAME: &str = ".history.jsonl";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error on history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode history record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid history index {index}; valid range is 0..{available}")]
    InvalidIndex { index: usize, available: usize },

    #[error("Record {0} deleted its files and cannot be restored")]
    NotRestorable(usize),

    #[error("No valid 'moved' history records to restore")]
    NothingToRestore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Moved,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulledFile {
    pub original: String,
    /// Where the file went; absent when it was deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub retained: String,
    pub culled: Vec<CulledFile>,
    pub action: HistoryAction,
}

impl HistoryRecord {
    pub fn now(retained: &Path, culled: Vec<CulledFile>, action: HistoryAction) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            retained: retained.to_string_lossy().into_owned(),
            culled,
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSelection {
    /// The most recent "moved" record
    Latest,
    Record(usize),
    All,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<PathBuf>,
    pub records_removed: usize,
}

pub struct History {
    file: PathBuf,
}

impl History {
    /// Ledger stored at `<dir>/.history.jsonl`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            file: dir.join(HISTORY_FILE_NAME),
        }
    }

    /// Ledger for a run rooted at `root`: inside it when it is a directory,
    /// next to it when it is a single file.
    pub fn for_root(root: &Path) -> Self {
        if root.is_file() {
            Self::in_dir(root.parent().unwrap_or_else(|| Path::new(".")))
        } else {
            Self::in_dir(root)
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.file.clone(),
            source,
        }
    }

    pub fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let line = serde_json::to_string(record)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)
            .map_err(|e| self.io_error(e))?;
        writeln!(out, "{line}").map_err(|e| self.io_error(e))
    }

    /// Raw lines of the ledger; an absent ledger is empty.
    fn lines(&self) -> Result<Vec<String>, HistoryError> {
        let f = match File::open(&self.file) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        BufReader::new(f)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .collect::<Result<_, _>>()
            .map_err(|e| self.io_error(e))
    }

    /// Records with their line index. Malformed lines are logged and skipped.
    pub fn list(&self) -> Result<Vec<(usize, HistoryRecord)>, HistoryError> {
        let mut records = Vec::new();
        for (i, line) in self.lines()?.iter().enumerate() {
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => records.push((i, record)),
                Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
            }
        }
        Ok(records)
    }

    /// Moves archived files back to where they came from and drops the
    /// restored records from the ledger. Files whose archive copy is gone or
    /// whose original path is occupied again are left alone.
    pub fn restore(&self, selection: RestoreSelection) -> Result<RestoreReport, HistoryError> {
        let lines = self.lines()?;
        let parsed: Vec<Option<HistoryRecord>> = lines
            .iter()
            .map(|line| serde_json::from_str(line).ok())
            .collect();
        let movable: Vec<usize> = parsed
            .iter()
            .enumerate()
            .filter(|(_, record)| matches!(record, Some(r) if r.action == HistoryAction::Moved))
            .map(|(i, _)| i)
            .collect();

        let selected: Vec<usize> = match selection {
            RestoreSelection::All => movable.clone(),
            RestoreSelection::Latest => movable.last().copied().into_iter().collect(),
            RestoreSelection::Record(index) => {
                if index >= lines.len() || parsed[index].is_none() {
                    return Err(HistoryError::InvalidIndex {
                        index,
                        available: lines.len(),
                    });
                }
                if !movable.contains(&index) {
                    return Err(HistoryError::NotRestorable(index));
                }
                vec![index]
            }
        };
        if selected.is_empty() {
            return Err(HistoryError::NothingToRestore);
        }

        let mut report = RestoreReport::default();
        for &i in &selected {
            let Some(record) = &parsed[i] else { continue };
            log::info!(
                "Restoring {} files from record {}",
                record.culled.len(),
                record.timestamp
            );
            for culled in &record.culled {
                let Some(archived) = &culled.archived else { continue };
                let src = PathBuf::from(archived);
                let dest = PathBuf::from(&culled.original);

                if !src.exists() {
                    log::warn!("Source file {} does not exist; skipping", src.display());
                    report.skipped.push(src);
                    continue;
                }
                if dest.exists() {
                    log::warn!("Destination {} is occupied; skipping", dest.display());
                    report.skipped.push(src);
                    continue;
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
                }
                match fs::rename(&src, &dest) {
                    Ok(()) => report.restored.push((src, dest)),
                    Err(e) => {
                        log::warn!("Failed to restore {} → {}: {}", src.display(), dest.display(), e);
                        report.skipped.push(src);
                    }
                }
            }
        }

        let remaining: Vec<&str> = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| !selected.contains(i))
            .map(|(_, line)| line.as_str())
            .collect();
        let new_content = if remaining.is_empty() {
            String::new()
        } else {
            remaining.join("\n") + "\n"
        };
        fs::write(&self.file, new_content).map_err(|e| self.io_error(e))?;
        report.records_removed = selected.len();

        Ok(report)
    }
}
