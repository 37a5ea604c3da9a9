//! Groups visually near-identical PNGs and gives every group a sortable
//! five-digit prefix.
//!
//! Every unordered pair is compared once, so a run is O(n²) in the number of
//! files. That is fine for the few hundred stickers of a pack; larger batches
//! need a nearest-neighbour index instead of the full pair scan. Memory is
//! linear too: every [`ImageFile`] keeps its bytes cached until the run ends.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::file::ImageFile;
use crate::core::naming::{self, delete_me_name, existing_group_id, grouped_name, strip_group_prefix};
use crate::core::perceptual::{DctMeanHasher, PerceptualHash, PerceptualHasher};
use crate::core::scanner::ScannerService;
use crate::core::union_find::UnionFind;
use crate::error::{DedupError, Result};
use crate::summary::{FileFailure, RunSummary, Stage};

/// Score given to clusters without any internal edge.
pub const SINGLETON_SCORE: f64 = 0.999;

/// Clusters scoring below this are logged when their group is created.
const NOTABLE_SCORE: f64 = 0.9;

/// Pair of arena positions with `a < b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEdge {
    pub a: usize,
    pub b: usize,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// Mean distance of the edges inside the cluster
    pub score: f64,
    /// Arena positions, ascending
    pub members: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct ClusterOutcome {
    /// Group id → final paths of its members
    pub groups: BTreeMap<String, Vec<PathBuf>>,
    pub summary: RunSummary,
}

/// Keeps every pair at or below `threshold`. Rows of the upper triangle are
/// scanned in parallel and collected before any clustering happens.
pub fn similarity_edges(hashes: &[PerceptualHash], threshold: f64) -> Vec<SimilarityEdge> {
    (0..hashes.len())
        .into_par_iter()
        .flat_map_iter(|a| {
            (a + 1..hashes.len()).filter_map(move |b| {
                let distance = hashes[a].distance(&hashes[b]);
                (distance <= threshold).then_some(SimilarityEdge { a, b, distance })
            })
        })
        .collect()
}

/// Connected components over `0..len`, singletons included.
pub fn build_clusters(len: usize, edges: &[SimilarityEdge]) -> Vec<Cluster> {
    let mut uf = UnionFind::new(len);
    for edge in edges {
        uf.union(edge.a, edge.b);
    }

    let mut totals = vec![(0.0f64, 0usize); len];
    for edge in edges {
        let root = uf.find(edge.a);
        totals[root].0 += edge.distance;
        totals[root].1 += 1;
    }

    uf.sets()
        .into_iter()
        .map(|members| {
            let (sum, count) = totals[uf.find(members[0])];
            let score = if count == 0 {
                SINGLETON_SCORE
            } else {
                sum / count as f64
            };
            Cluster { score, members }
        })
        .collect()
}

pub struct SimilarityClusterer<H = DctMeanHasher> {
    hasher: H,
}

impl SimilarityClusterer<DctMeanHasher> {
    pub fn new(config: &Config) -> Self {
        Self::with_hasher(DctMeanHasher::new(config.hash_precision))
    }
}

impl<H: PerceptualHasher> SimilarityClusterer<H> {
    pub fn with_hasher(hasher: H) -> Self {
        Self { hasher }
    }

    /// Discover the PNGs under `root`, then cluster and rename them.
    pub fn process(&self, root: &Path, config: &Config) -> Result<ClusterOutcome> {
        let (files, failures) = ScannerService::png_only().discover_files(root)?;
        log::info!("Found {} PNG files to process", files.len());
        if files.is_empty() {
            log::warn!("No PNG files found at: {}", root.display());
        }

        let mut outcome = self.process_files(files, config);
        outcome.summary.files_scanned += failures.len();
        outcome.summary.extend_failures(failures);
        Ok(outcome)
    }

    /// Cluster and rename already content-deduplicated files. Non-PNG
    /// entries are ignored.
    pub fn process_files(&self, files: Vec<ImageFile>, config: &Config) -> ClusterOutcome {
        let mut summary = RunSummary::new(config.dry_run);
        let png = ScannerService::png_only();
        let mut files: Vec<ImageFile> = files
            .into_iter()
            .filter(|file| png.is_supported_format(file.path()))
            .collect();
        files.sort_by_key(ImageFile::id);
        summary.files_scanned = files.len();

        let (mut arena, hashes) = self.hash_all(files, &mut summary);
        log::info!("Created {} hashes", hashes.len());

        let edges = similarity_edges(&hashes, config.similarity_threshold);
        for edge in &edges {
            log::debug!(
                "{:.4} - {} vs {}",
                edge.distance,
                arena[edge.a].file_name(),
                arena[edge.b].file_name()
            );
        }

        let clusters = build_clusters(arena.len(), &edges);
        log::info!("Created {} clusters from {} files", clusters.len(), arena.len());

        let mut clusters: Vec<Cluster> = clusters
            .into_iter()
            .map(|cluster| {
                if cluster.members.len() > 1 && cluster.score <= config.exact_copy_threshold {
                    collapse(cluster, &mut arena, config.dry_run, &mut summary)
                } else {
                    cluster
                }
            })
            .collect();
        order_clusters(&mut clusters, &arena);
        summary.clusters_formed = clusters.len();

        let groups = rename_clusters(&clusters, &mut arena, config.dry_run, &mut summary);
        log::info!(
            "Renamed {} files across {} groups",
            summary.renames_applied,
            groups.len()
        );

        ClusterOutcome { groups, summary }
    }

    fn hash_all(
        &self,
        files: Vec<ImageFile>,
        summary: &mut RunSummary,
    ) -> (Vec<ImageFile>, Vec<PerceptualHash>) {
        let results: Vec<Result<PerceptualHash>> = files
            .par_iter()
            .map(|file| file.decode().map(|image| self.hasher.hash_image(&image)))
            .collect();

        let mut arena = Vec::with_capacity(files.len());
        let mut hashes = Vec::with_capacity(files.len());
        for (file, result) in files.into_iter().zip(results) {
            match result {
                Ok(hash) => {
                    arena.push(file);
                    hashes.push(hash);
                }
                Err(e) => {
                    log::warn!("Could not read image: {}: {}", file.path().display(), e);
                    summary.record_failure(FileFailure::new(file.path(), Stage::PerceptualHash, &e));
                }
            }
        }
        (arena, hashes)
    }
}

/// Handles a cluster of accidental copies. Live: the smallest file stays,
/// the rest are deleted. Dry-run: the rest get a `_DELETE-ME` suffix.
fn collapse(
    cluster: Cluster,
    arena: &mut [ImageFile],
    dry_run: bool,
    summary: &mut RunSummary,
) -> Cluster {
    let keep = cluster
        .members
        .iter()
        .copied()
        .min_by_key(|&m| (arena[m].size(), m))
        .unwrap_or(cluster.members[0]);
    log::info!(
        "Detected full match (score:{}), removing {} images...",
        cluster.score,
        cluster.members.len() - 1
    );

    let mut members = vec![keep];
    for &member in cluster.members.iter().filter(|&&m| m != keep) {
        let path = arena[member].path().to_path_buf();
        if !dry_run {
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("Deleted {}", path.display());
                    summary.duplicates_removed += 1;
                }
                Err(e) => {
                    let e = DedupError::io(&path, e);
                    log::warn!("Failed to delete {}: {}", path.display(), e);
                    summary.record_failure(FileFailure::new(&path, Stage::Collapse, &e));
                    members.push(member);
                }
            }
            continue;
        }

        let target = path.with_file_name(delete_me_name(&arena[member].file_name()));
        let marked = if target == path {
            log::debug!("Already marked for deletion: {}", path.display());
            Ok(target)
        } else if target.exists() {
            Err(DedupError::Collision {
                source_path: path.clone(),
                target,
            })
        } else {
            fs::rename(&path, &target)
                .map(|()| target)
                .map_err(|e| DedupError::io(&path, e))
        };
        match marked {
            Ok(target) => {
                log::info!("Marked {} for deletion", target.display());
                arena[member].moved_to(target);
                summary.duplicates_removed += 1;
            }
            Err(e) => {
                log::warn!("Could not mark {}: {}", path.display(), e);
                summary.record_failure(FileFailure::new(&path, Stage::Collapse, &e));
            }
        }
        members.push(member);
    }

    members.sort_unstable();
    let score = if members.len() == 1 {
        SINGLETON_SCORE
    } else {
        cluster.score
    };
    Cluster { score, members }
}

/// Larger clusters first, then tighter ones. Remaining ties keep the order
/// an earlier run gave them, so reruns reproduce the same group ids.
fn order_clusters(clusters: &mut [Cluster], arena: &[ImageFile]) {
    let tie_key = |cluster: &Cluster| {
        let prior = cluster
            .members
            .iter()
            .filter_map(|&m| existing_group_id(&arena[m].file_name()))
            .min()
            .unwrap_or(u32::MAX);
        let name = cluster
            .members
            .iter()
            .map(|&m| strip_group_prefix(&arena[m].file_name()).to_string())
            .min()
            .unwrap_or_default();
        (prior, name, cluster.members[0])
    };

    let mut keyed: Vec<_> = clusters
        .iter()
        .cloned()
        .map(|cluster| (tie_key(&cluster), cluster))
        .collect();
    keyed.sort_by(|(key_a, a), (key_b, b)| {
        b.members
            .len()
            .cmp(&a.members.len())
            .then_with(|| a.score.total_cmp(&b.score))
            .then_with(|| key_a.cmp(key_b))
    });

    for (slot, (_, cluster)) in clusters.iter_mut().zip(keyed) {
        *slot = cluster;
    }
}

/// Applies the group prefix to every member. Existing targets are never
/// overwritten; the file keeps its name and the collision is recorded.
pub fn rename_clusters(
    clusters: &[Cluster],
    arena: &mut [ImageFile],
    dry_run: bool,
    summary: &mut RunSummary,
) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups = BTreeMap::new();
    let mut reserved: HashSet<PathBuf> = HashSet::new();

    for (position, cluster) in clusters.iter().enumerate() {
        let group_id = naming::group_id(position);
        if cluster.score < NOTABLE_SCORE {
            log::info!(
                "Creating group {} with avgScore {:.4} from {} files",
                group_id,
                cluster.score,
                cluster.members.len()
            );
        }

        let mut paths = Vec::with_capacity(cluster.members.len());
        for &member in &cluster.members {
            let file = &mut arena[member];
            let source = file.path().to_path_buf();
            let Some(new_name) = grouped_name(&group_id, &file.file_name()) else {
                log::debug!("File already has correct prefix: {}", source.display());
                paths.push(source);
                continue;
            };

            let target = source.with_file_name(&new_name);
            if target == source {
                paths.push(source);
                continue;
            }
            if target.exists() || reserved.contains(&target) {
                let e = DedupError::Collision {
                    source_path: source.clone(),
                    target,
                };
                log::warn!("{}", e);
                summary.record_failure(FileFailure::new(&source, Stage::Rename, &e));
                paths.push(source);
                continue;
            }

            if !dry_run {
                if let Err(e) = fs::rename(&source, &target) {
                    let e = DedupError::io(&source, e);
                    log::error!("Error renaming file: {}: {}", source.display(), e);
                    summary.record_failure(FileFailure::new(&source, Stage::Rename, &e));
                    paths.push(source);
                    continue;
                }
            }
            log::debug!("Renamed: {} -> {}", source.display(), new_name);
            reserved.insert(target.clone());
            file.moved_to(target.clone());
            summary.renames_applied += 1;
            paths.push(target);
        }

        groups.insert(group_id, paths);
    }

    groups
}
