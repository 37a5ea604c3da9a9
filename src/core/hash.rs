use rayon::prelude::*;

use crate::core::file::ImageFile;
use crate::error::Result;

/// Content hashing for exact duplicate detection. BLAKE3 is used for
/// equality only; collisions are assumed not to happen.
pub struct HashService;

impl HashService {
    pub fn new() -> Self {
        Self
    }

    /// 64 hex characters over the full file bytes. Cached on the file.
    pub fn compute_content_hash<'a>(&self, file: &'a ImageFile) -> Result<&'a str> {
        if let Some(hash) = file.cached_content_hash() {
            return Ok(hash);
        }
        let hash = Self::hash_bytes(file.bytes()?);
        Ok(file.cache_content_hash(hash))
    }

    pub fn hash_bytes(bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    /// Hash a batch in parallel, keeping input order in the result.
    pub fn compute_content_hashes_batch<'a>(
        &self,
        files: &'a [ImageFile],
    ) -> Vec<(usize, Result<&'a str>)> {
        files
            .par_iter()
            .map(|file| (file.id(), self.compute_content_hash(file)))
            .collect()
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_compute_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.png");
        fs::write(&file_path, b"Hello, World!").unwrap();

        let file = ImageFile::open(0, &file_path).unwrap();
        let hash_service = HashService::new();
        let hash = hash_service.compute_content_hash(&file).unwrap();

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, HashService::hash_bytes(b"Hello, World!"));
    }

    #[test]
    fn test_identical_files_same_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("file1.png");
        let file2 = temp_dir.path().join("file2.png");
        fs::write(&file1, b"Identical content").unwrap();
        fs::write(&file2, b"Identical content").unwrap();

        let a = ImageFile::open(0, &file1).unwrap();
        let b = ImageFile::open(1, &file2).unwrap();
        let hash_service = HashService::new();
        assert_eq!(
            hash_service.compute_content_hash(&a).unwrap(),
            hash_service.compute_content_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_one_byte_difference() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("file1.png");
        let file2 = temp_dir.path().join("file2.png");
        fs::write(&file1, b"Content A").unwrap();
        fs::write(&file2, b"Content B").unwrap();

        let a = ImageFile::open(0, &file1).unwrap();
        let b = ImageFile::open(1, &file2).unwrap();
        let hash_service = HashService::new();
        assert_ne!(
            hash_service.compute_content_hash(&a).unwrap(),
            hash_service.compute_content_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_batch_hashing() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("file1.png");
        let file2 = temp_dir.path().join("file2.png");
        fs::write(&file1, b"Content 1").unwrap();

        let files = vec![
            ImageFile::open(0, &file1).unwrap(),
            ImageFile::with_size(1, &file2, 0),
        ];
        let results = HashService::new().compute_content_hashes_batch(&files);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }
}
