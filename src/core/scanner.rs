use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::core::file::ImageFile;
use crate::error::{DedupError, Result};
use crate::summary::{FileFailure, Stage};

/// Suffix of the sibling directory that receives archived exact duplicates.
pub const ARCHIVE_DIR_SUFFIX: &str = "_duplicates";
/// Directory holding the untouched originals of repaired CgBI files.
pub const BACKUP_DIR_NAME: &str = "broken_imgs";

const IMAGE_FORMATS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

pub struct ScannerService {
    supported_formats: HashSet<String>,
}

impl ScannerService {
    /// Every raster format the exact-duplicate pass understands.
    pub fn images() -> Self {
        Self::with_formats(IMAGE_FORMATS)
    }

    /// PNG only, for CgBI repair and similarity clustering.
    pub fn png_only() -> Self {
        Self::with_formats(&["png"])
    }

    fn with_formats(formats: &[&str]) -> Self {
        Self {
            supported_formats: formats.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    pub fn is_supported_format(&self, file_path: &Path) -> bool {
        if let Some(extension) = file_path.extension() {
            let ext = extension.to_string_lossy().to_lowercase();
            self.supported_formats.contains(&ext)
        } else {
            false
        }
    }

    /// Recursively list supported files under `root`, sorted by path.
    /// A file root yields itself when supported. Archive and backup
    /// directories are never entered.
    pub fn discover_paths(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let root = std::path::absolute(root).map_err(|e| DedupError::io(root, e))?;
        if !root.exists() {
            return Err(DedupError::io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "path does not exist"),
            ));
        }

        if root.is_file() {
            return Ok(if self.is_supported_format(&root) {
                vec![root]
            } else {
                Vec::new()
            });
        }

        let mut discovered = Vec::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_reserved_dir(entry));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.is_supported_format(entry.path()) {
                        discovered.push(entry.into_path());
                    }
                }
                Err(e) => log::warn!("Skipping unreadable entry under {}: {}", root.display(), e),
            }
        }

        discovered.sort();
        Ok(discovered)
    }

    /// Like [`discover_paths`](Self::discover_paths) but opens each file,
    /// assigning ids in discovery order. Unreadable files become failures.
    pub fn discover_files(&self, root: &Path) -> Result<(Vec<ImageFile>, Vec<FileFailure>)> {
        let paths = self.discover_paths(root)?;
        Ok(open_all(paths))
    }
}

/// Opens every path, numbering the successful ones consecutively.
pub fn open_all(paths: Vec<PathBuf>) -> (Vec<ImageFile>, Vec<FileFailure>) {
    let mut files = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    for path in paths {
        match ImageFile::open(files.len(), &path) {
            Ok(file) => files.push(file),
            Err(e) => {
                log::warn!("Cannot open {}: {}", path.display(), e);
                failures.push(FileFailure::new(path, Stage::Discovery, &e));
            }
        }
    }
    (files, failures)
}

fn is_reserved_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == BACKUP_DIR_NAME || name.ends_with(ARCHIVE_DIR_SUFFIX)
}
