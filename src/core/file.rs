use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{DedupError, Result};

/// One discovered file. `id` is its position in discovery order and never
/// changes; `path` only changes when the file is renamed.
///
/// Bytes stay cached for the lifetime of the entry, so a full run holds
/// every file of the tree in memory from repair until clustering ends.
#[derive(Debug)]
pub struct ImageFile {
    id: usize,
    path: PathBuf,
    size: u64,
    bytes: OnceLock<Vec<u8>>,
    content_hash: OnceLock<String>,
}

impl ImageFile {
    pub fn open(id: usize, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path).map_err(|e| DedupError::io(&path, e))?;
        Ok(Self::with_size(id, path, metadata.len()))
    }

    pub fn with_size(id: usize, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            id,
            path: path.into(),
            size,
            bytes: OnceLock::new(),
            content_hash: OnceLock::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Reads the file on first call; later calls reuse the buffer.
    pub fn bytes(&self) -> Result<&[u8]> {
        if let Some(bytes) = self.bytes.get() {
            return Ok(bytes);
        }
        let data = fs::read(&self.path).map_err(|e| DedupError::io(&self.path, e))?;
        Ok(self.bytes.get_or_init(|| data))
    }

    pub fn cached_content_hash(&self) -> Option<&str> {
        self.content_hash.get().map(String::as_str)
    }

    pub(crate) fn cache_content_hash(&self, hash: String) -> &str {
        self.content_hash.get_or_init(|| hash)
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(self.bytes()?).map_err(|source| DedupError::Image {
            path: self.path.clone(),
            source,
        })
    }

    /// Points this entry at its new location. Cached content stays valid
    /// because a rename never changes bytes.
    pub(crate) fn moved_to(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// Replaces the cached bytes with a repaired version of the file.
    pub(crate) fn rewritten(&mut self, bytes: Vec<u8>) {
        self.size = bytes.len() as u64;
        self.bytes = OnceLock::from(bytes);
        self.content_hash = OnceLock::new();
    }
}
