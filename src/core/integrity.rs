use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::core::cgbi;
use crate::core::file::ImageFile;
use crate::core::naming::unique_path;
use crate::core::scanner::{BACKUP_DIR_NAME, ScannerService};
use crate::error::{DedupError, Result};
use crate::summary::{FileFailure, RunSummary, Stage};

#[derive(Debug, Clone, PartialEq)]
pub enum RepairStatus {
    /// Standard PNG or not a PNG at all
    Clean,
    /// Dry-run found a CgBI file
    WouldRepair,
    /// Rewritten in place, original bytes kept at `backup`
    Repaired { backup: PathBuf },
}

/// Makes sure every PNG handed to the later stages is a standard one.
#[derive(Debug, Default)]
pub struct IntegrityGate {
    backup_dir: Option<PathBuf>,
}

impl IntegrityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep originals in `dir` instead of `<grandparent>/broken_imgs`.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Discover every supported file under `root` and repair its PNGs.
    pub fn process(&self, root: &Path, dry_run: bool) -> Result<(Vec<ImageFile>, RunSummary)> {
        let (mut files, failures) = ScannerService::images().discover_files(root)?;
        let mut summary = self.check(&mut files, dry_run);
        summary.files_scanned += failures.len();
        summary.extend_failures(failures);
        Ok((files, summary))
    }

    /// Repairs CgBI files in place. Files that cannot be repaired are
    /// dropped from `files` and reported.
    pub fn check(&self, files: &mut Vec<ImageFile>, dry_run: bool) -> RunSummary {
        let mut summary = RunSummary::new(dry_run);
        summary.files_scanned = files.len();

        let png = ScannerService::png_only();
        let repairs: Vec<Option<Result<Vec<u8>>>> = files
            .par_iter()
            .map(|file| {
                if !png.is_supported_format(file.path()) {
                    return None;
                }
                match file.bytes() {
                    Ok(bytes) if cgbi::is_cgbi(bytes) => {
                        Some(cgbi::repair(bytes).map_err(DedupError::from))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .collect();

        let mut reserved = HashSet::new();
        let mut broken = HashSet::new();
        for (file, repair) in files.iter_mut().zip(repairs) {
            let Some(repair) = repair else { continue };
            match repair.and_then(|repaired| self.apply(file, repaired, dry_run, &mut reserved)) {
                Ok(RepairStatus::Repaired { backup }) => {
                    log::info!(
                        "Repaired CgBI image {} (original kept at {})",
                        file.path().display(),
                        backup.display()
                    );
                    summary.files_repaired += 1;
                }
                Ok(RepairStatus::WouldRepair) => {
                    log::info!("[dry-run] would repair CgBI image {}", file.path().display());
                    summary.files_repaired += 1;
                }
                Ok(RepairStatus::Clean) => {}
                Err(e) => {
                    log::warn!("Cannot repair {}: {}", file.path().display(), e);
                    summary.record_failure(FileFailure::new(file.path(), Stage::Repair, &e));
                    broken.insert(file.id());
                }
            }
        }

        files.retain(|file| !broken.contains(&file.id()));
        summary
    }

    /// Repairs a single file. Exposed for callers that manage their own
    /// file set.
    pub fn repair_file(&self, file: &mut ImageFile, dry_run: bool) -> Result<RepairStatus> {
        let bytes = file.bytes()?;
        if !cgbi::is_cgbi(bytes) {
            return Ok(RepairStatus::Clean);
        }
        let repaired = cgbi::repair(bytes)?;
        self.apply(file, repaired, dry_run, &mut HashSet::new())
    }

    fn apply(
        &self,
        file: &mut ImageFile,
        repaired: Vec<u8>,
        dry_run: bool,
        reserved: &mut HashSet<PathBuf>,
    ) -> Result<RepairStatus> {
        if dry_run {
            // later previews in the same run see the repaired pixels
            file.rewritten(repaired);
            return Ok(RepairStatus::WouldRepair);
        }

        let path = file.path().to_path_buf();
        let backup = unique_path(self.backup_target(&path), reserved);
        if let Some(dir) = backup.parent() {
            fs::create_dir_all(dir).map_err(|e| DedupError::io(dir, e))?;
        }
        fs::copy(&path, &backup).map_err(|e| DedupError::io(&path, e))?;
        reserved.insert(backup.clone());

        write_atomically(&path, &repaired)?;
        file.rewritten(repaired);
        Ok(RepairStatus::Repaired { backup })
    }

    fn backup_target(&self, path: &Path) -> PathBuf {
        let name = path.file_name().unwrap_or_default();
        let dir = match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => {
                let parent = path.parent().unwrap_or_else(|| Path::new("."));
                parent.parent().unwrap_or(parent).join(BACKUP_DIR_NAME)
            }
        };
        dir.join(name)
    }
}

/// Writes next to `path` then renames over it, so readers never see a
/// half-written file.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| DedupError::io(dir, e))?;
    temp.write_all(bytes).map_err(|e| DedupError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| DedupError::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| DedupError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use image::ImageFormat;
    use tempfile::TempDir;

    fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(kind);
        hasher.update(data);
        out.extend_from_slice(&hasher.finalize().to_be_bytes());
    }

    /// 1×1 RGB CgBI image storing `bgr` as written by Apple's tooling.
    fn cgbi_pixel(bgr: [u8; 3]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0, bgr[0], bgr[1], bgr[2]]).unwrap();
        let idat = encoder.finish().unwrap();

        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);

        let mut png = cgbi::PNG_SIGNATURE.to_vec();
        chunk(&mut png, b"CgBI", &[0x50, 0x00, 0x20, 0x06]);
        chunk(&mut png, b"IHDR", &ihdr);
        chunk(&mut png, b"IDAT", &idat);
        chunk(&mut png, b"IEND", &[]);
        png
    }

    fn pack(temp_dir: &TempDir) -> PathBuf {
        let pack = temp_dir.path().join("pack");
        fs::create_dir_all(&pack).unwrap();
        pack
    }

    #[test]
    fn test_cgbi_file_is_repaired_and_backed_up() {
        let temp_dir = TempDir::new().unwrap();
        let pack = pack(&temp_dir);
        let original = cgbi_pixel([10, 20, 30]);
        fs::write(pack.join("s.png"), &original).unwrap();

        let (files, summary) = IntegrityGate::new().process(&pack, false).unwrap();

        assert_eq!(summary.files_repaired, 1);
        assert_eq!(files.len(), 1);
        let repaired = fs::read(pack.join("s.png")).unwrap();
        assert!(!cgbi::is_cgbi(&repaired));
        assert_eq!(files[0].bytes().unwrap(), repaired.as_slice());

        let img = image::load_from_memory_with_format(&repaired, ImageFormat::Png)
            .unwrap()
            .to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10]);

        let backup = temp_dir.path().join(BACKUP_DIR_NAME).join("s.png");
        assert_eq!(fs::read(backup).unwrap(), original);
    }

    #[test]
    fn test_dry_run_only_reports() {
        let temp_dir = TempDir::new().unwrap();
        let pack = pack(&temp_dir);
        let original = cgbi_pixel([1, 2, 3]);
        fs::write(pack.join("s.png"), &original).unwrap();

        let (_, summary) = IntegrityGate::new().process(&pack, true).unwrap();

        assert_eq!(summary.files_repaired, 1);
        assert_eq!(fs::read(pack.join("s.png")).unwrap(), original);
        assert!(!temp_dir.path().join(BACKUP_DIR_NAME).exists());
    }

    #[test]
    fn test_standard_files_pass_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let pack = pack(&temp_dir);
        image::RgbImage::from_pixel(2, 2, image::Rgb([9, 9, 9]))
            .save(pack.join("ok.png"))
            .unwrap();
        fs::write(pack.join("photo.jpg"), b"jpeg-ish").unwrap();
        let before = fs::read(pack.join("ok.png")).unwrap();

        let (files, summary) = IntegrityGate::new().process(&pack, false).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(summary.files_repaired, 0);
        assert_eq!(summary.files_skipped, 0);
        assert_eq!(fs::read(pack.join("ok.png")).unwrap(), before);
    }

    #[test]
    fn test_unrepairable_file_is_reported_and_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let pack = pack(&temp_dir);
        let mut broken = cgbi_pixel([1, 2, 3]);
        broken.truncate(broken.len() - 12);
        fs::write(pack.join("broken.png"), &broken).unwrap();

        let (files, summary) = IntegrityGate::new().process(&pack, false).unwrap();

        assert!(files.is_empty());
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.failures[0].stage, Stage::Repair);
        assert_eq!(fs::read(pack.join("broken.png")).unwrap(), broken);
    }

    #[test]
    fn test_backup_names_never_clash() {
        let temp_dir = TempDir::new().unwrap();
        let backups = temp_dir.path().join("backups");
        for dir in ["one", "two"] {
            let pack = temp_dir.path().join(dir);
            fs::create_dir_all(&pack).unwrap();
            fs::write(pack.join("s.png"), cgbi_pixel([4, 5, 6])).unwrap();
        }

        let gate = IntegrityGate::new().with_backup_dir(&backups);
        let (_, summary) = gate.process(temp_dir.path(), false).unwrap();

        assert_eq!(summary.files_repaired, 2);
        assert!(backups.join("s.png").exists());
        assert!(backups.join("s_1.png").exists());
    }

    #[test]
    fn test_repair_file_twice() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("s.png");
        fs::write(&path, cgbi_pixel([7, 8, 9])).unwrap();

        let gate = IntegrityGate::new();
        let mut file = ImageFile::open(0, &path).unwrap();
        assert!(matches!(
            gate.repair_file(&mut file, false).unwrap(),
            RepairStatus::Repaired { .. }
        ));
        assert_eq!(gate.repair_file(&mut file, false).unwrap(), RepairStatus::Clean);
    }
}
