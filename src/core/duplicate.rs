// Exact duplicate detection: files are grouped by content hash, one survivor
// per group is kept and the rest are archived next to their directory or
// deleted. Survivor rule: smallest file size, ties broken by discovery order.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, DuplicateAction};
use crate::core::file::ImageFile;
use crate::core::hash::HashService;
use crate::core::naming::unique_path;
use crate::core::scanner::ARCHIVE_DIR_SUFFIX;
use crate::error::DedupError;
use crate::history::{CulledFile, History, HistoryAction, HistoryRecord};
use crate::summary::{FileFailure, RunSummary, Stage};

/// Hash → positions (into the indexed slice) of byte-identical files, in
/// discovery order.
#[derive(Debug, Default)]
pub struct ContentIndex {
    groups: BTreeMap<String, Vec<usize>>,
}

impl ContentIndex {
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.groups
            .iter()
            .map(|(hash, members)| (hash.as_str(), members.as_slice()))
    }

    pub fn duplicate_sets(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.groups().filter(|(_, members)| members.len() > 1)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Where a non-survivor goes. `to == None` means deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relocation {
    pub from: PathBuf,
    pub to: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicatePlan {
    pub hash: String,
    pub survivor: PathBuf,
    pub relocations: Vec<Relocation>,
}

#[derive(Debug)]
pub struct DedupOutcome {
    /// Every hashed group, including singletons, mapped to the file kept.
    pub survivors: BTreeMap<String, PathBuf>,
    pub plans: Vec<DuplicatePlan>,
    /// Files still in place after the run, in discovery order.
    pub remaining: Vec<ImageFile>,
    pub summary: RunSummary,
}

pub struct ExactDuplicateIndex {
    hash_service: HashService,
    action: DuplicateAction,
    archive_dir: Option<PathBuf>,
}

impl ExactDuplicateIndex {
    pub fn new(action: DuplicateAction) -> Self {
        Self {
            hash_service: HashService::new(),
            action,
            archive_dir: None,
        }
    }

    /// Send every archived duplicate to one directory instead of the
    /// per-directory `<dir>_duplicates` sibling.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Content-hash every file in parallel and group the results.
    pub fn index(&self, files: &[ImageFile]) -> (ContentIndex, Vec<FileFailure>) {
        let mut index = ContentIndex::default();
        let mut failures = Vec::new();

        for (position, (_, result)) in self
            .hash_service
            .compute_content_hashes_batch(files)
            .into_iter()
            .enumerate()
        {
            match result {
                Ok(hash) => index
                    .groups
                    .entry(hash.to_string())
                    .or_default()
                    .push(position),
                Err(e) => {
                    log::warn!("Failed to compute hash for {}: {}", files[position].path().display(), e);
                    failures.push(FileFailure::new(files[position].path(), Stage::ContentHash, &e));
                }
            }
        }

        log::info!(
            "Indexed {} files into {} content groups",
            files.len() - failures.len(),
            index.len()
        );
        (index, failures)
    }

    pub fn select_survivor(files: &[ImageFile], members: &[usize]) -> usize {
        members
            .iter()
            .copied()
            .min_by_key(|&position| (files[position].size(), files[position].id()))
            .unwrap_or_default()
    }

    /// Decide survivors and destinations without touching the filesystem.
    pub fn plan(&self, files: &[ImageFile], index: &ContentIndex) -> Vec<DuplicatePlan> {
        let mut reserved = HashSet::new();
        index
            .duplicate_sets()
            .map(|(hash, members)| {
                let survivor = Self::select_survivor(files, members);
                let survivor_path = files[survivor].path();
                let relocations = members
                    .iter()
                    .filter(|&&position| position != survivor)
                    .map(|&position| {
                        let from = files[position].path().to_path_buf();
                        let to = match self.action {
                            DuplicateAction::Delete => None,
                            DuplicateAction::Archive => {
                                let wanted =
                                    archive_target(survivor_path, &from, self.archive_dir.as_deref());
                                let target = unique_path(wanted, &reserved);
                                reserved.insert(target.clone());
                                Some(target)
                            }
                        };
                        Relocation { from, to }
                    })
                    .collect();
                DuplicatePlan {
                    hash: hash.to_string(),
                    survivor: survivor_path.to_path_buf(),
                    relocations,
                }
            })
            .collect()
    }

    /// Index, plan and (unless `config.dry_run`) carry out the plan.
    /// Applied groups are appended to `history` when given.
    pub fn deduplicate(
        &self,
        files: Vec<ImageFile>,
        config: &Config,
        history: Option<&History>,
    ) -> DedupOutcome {
        let mut summary = RunSummary::new(config.dry_run);
        summary.files_scanned = files.len();

        let (index, failures) = self.index(&files);
        summary.extend_failures(failures);
        let plans = self.plan(&files, &index);

        let survivors = index
            .groups()
            .map(|(hash, members)| {
                let keep = Self::select_survivor(&files, members);
                (hash.to_string(), files[keep].path().to_path_buf())
            })
            .collect();

        let mut removed: HashSet<PathBuf> = HashSet::new();
        for plan in &plans {
            if config.dry_run {
                for relocation in &plan.relocations {
                    match &relocation.to {
                        Some(to) => log::info!(
                            "[dry-run] would move {} → {}",
                            relocation.from.display(),
                            to.display()
                        ),
                        None => log::info!("[dry-run] would delete {}", relocation.from.display()),
                    }
                    removed.insert(relocation.from.clone());
                }
                continue;
            }

            let mut culled = Vec::new();
            for relocation in &plan.relocations {
                match apply_relocation(relocation) {
                    Ok(()) => {
                        removed.insert(relocation.from.clone());
                        culled.push(CulledFile {
                            original: relocation.from.to_string_lossy().into_owned(),
                            archived: relocation
                                .to
                                .as_ref()
                                .map(|to| to.to_string_lossy().into_owned()),
                        });
                    }
                    Err(e) => {
                        log::warn!("Failed to remove duplicate {}: {}", relocation.from.display(), e);
                        summary.record_failure(FileFailure::new(&relocation.from, Stage::Archive, &e));
                    }
                }
            }

            if let Some(history) = history.filter(|_| !culled.is_empty()) {
                let action = match self.action {
                    DuplicateAction::Archive => HistoryAction::Moved,
                    DuplicateAction::Delete => HistoryAction::Deleted,
                };
                let record = HistoryRecord::now(&plan.survivor, culled, action);
                if let Err(e) = history.append(&record) {
                    log::error!("Could not record history for {}: {}", plan.survivor.display(), e);
                }
            }
        }
        summary.duplicates_removed = removed.len();

        let unhashed: HashSet<&Path> = summary.failures.iter().map(|f| f.path.as_path()).collect();
        let remaining = files
            .into_iter()
            .filter(|file| !removed.contains(file.path()) && !unhashed.contains(file.path()))
            .collect();

        log::info!(
            "Deduplication complete: {} unique files, {} duplicates",
            index.len(),
            summary.duplicates_removed
        );

        DedupOutcome {
            survivors,
            plans,
            remaining,
            summary,
        }
    }
}

/// `<grandparent>/<parent>_duplicates/<survivor>_<duplicate>`, or inside
/// `override_dir` when one is configured.
fn archive_target(survivor: &Path, duplicate: &Path, override_dir: Option<&Path>) -> PathBuf {
    let parent = duplicate.parent().unwrap_or_else(|| Path::new("."));
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => match (parent.parent(), parent.file_name()) {
            (Some(grandparent), Some(name)) => {
                grandparent.join(format!("{}{ARCHIVE_DIR_SUFFIX}", name.to_string_lossy()))
            }
            _ => parent.join(ARCHIVE_DIR_SUFFIX),
        },
    };

    let survivor_name = survivor.file_name().unwrap_or_default().to_string_lossy();
    let duplicate_name = duplicate.file_name().unwrap_or_default().to_string_lossy();
    dir.join(format!("{survivor_name}_{duplicate_name}"))
}

fn apply_relocation(relocation: &Relocation) -> Result<(), DedupError> {
    let from = &relocation.from;
    match &relocation.to {
        None => fs::remove_file(from).map_err(|e| DedupError::io(from, e)),
        Some(to) => {
            if let Some(dir) = to.parent() {
                fs::create_dir_all(dir).map_err(|e| DedupError::io(dir, e))?;
            }
            if to.exists() {
                return Err(DedupError::Collision {
                    source_path: from.clone(),
                    target: to.clone(),
                });
            }
            fs::rename(from, to).map_err(|e| DedupError::io(from, e))
        }
    }
}
