use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Repair,
    ContentHash,
    Archive,
    PerceptualHash,
    Collapse,
    Rename,
}

/// A file that was left as it was because something went wrong with it.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: Stage,
    pub error: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, stage: Stage, error: &dyn std::error::Error) -> Self {
        Self {
            path: path.into(),
            stage,
            error: error.to_string(),
        }
    }
}

/// Counters reported at the end of every run, including partial failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub files_scanned: usize,
    pub files_repaired: usize,
    pub duplicates_removed: usize,
    pub clusters_formed: usize,
    pub renames_applied: usize,
    pub files_skipped: usize,
    pub failures: Vec<FileFailure>,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, failure: FileFailure) {
        self.files_skipped += 1;
        self.failures.push(failure);
    }

    pub fn extend_failures(&mut self, failures: impl IntoIterator<Item = FileFailure>) {
        for failure in failures {
            self.record_failure(failure);
        }
    }

    /// Adds the counters of a later phase. `files_scanned` keeps the larger
    /// value since phases see overlapping file sets.
    pub fn absorb(&mut self, other: RunSummary) {
        self.files_scanned = self.files_scanned.max(other.files_scanned);
        self.files_repaired += other.files_repaired;
        self.duplicates_removed += other.duplicates_removed;
        self.clusters_formed += other.clusters_formed;
        self.renames_applied += other.renames_applied;
        self.files_skipped += other.files_skipped;
        self.failures.extend(other.failures);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry-run)" } else { "" };
        writeln!(f, "Run summary{mode}:")?;
        writeln!(f, "  files scanned:      {}", self.files_scanned)?;
        writeln!(f, "  files repaired:     {}", self.files_repaired)?;
        writeln!(f, "  duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "  clusters formed:    {}", self.clusters_formed)?;
        writeln!(f, "  renames applied:    {}", self.renames_applied)?;
        write!(f, "  files skipped:      {}", self.files_skipped)?;
        for failure in &self.failures {
            write!(
                f,
                "\n    {:?} {}: {}",
                failure.stage,
                failure.path.display(),
                failure.error
            )?;
        }
        Ok(())
    }
}
