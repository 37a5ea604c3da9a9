use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::duplicate::ExactDuplicateIndex;
use crate::core::integrity::IntegrityGate;
use crate::core::perceptual::{DctMeanHasher, PerceptualHasher};
use crate::core::scanner::{ScannerService, open_all};
use crate::core::similarity::SimilarityClusterer;
use crate::error::Result;
use crate::history::History;
use crate::summary::RunSummary;

#[derive(Debug, Default, Serialize)]
pub struct PipelineOutcome {
    /// Content hash → file kept
    pub survivors: BTreeMap<String, PathBuf>,
    /// Group id → final member paths
    pub groups: BTreeMap<String, Vec<PathBuf>>,
    pub summary: RunSummary,
}

/// Repair, exact deduplication and similarity clustering over one tree.
pub struct Pipeline<H = DctMeanHasher> {
    gate: IntegrityGate,
    index: ExactDuplicateIndex,
    clusterer: SimilarityClusterer<H>,
}

impl Pipeline<DctMeanHasher> {
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            IntegrityGate::new(),
            ExactDuplicateIndex::new(config.duplicate_action),
            SimilarityClusterer::new(config),
        )
    }
}

impl<H: PerceptualHasher> Pipeline<H> {
    pub fn with_parts(
        gate: IntegrityGate,
        index: ExactDuplicateIndex,
        clusterer: SimilarityClusterer<H>,
    ) -> Self {
        Self {
            gate,
            index,
            clusterer,
        }
    }

    /// Validates `config` before touching anything under `root`.
    pub fn run(&self, root: &Path, config: &Config) -> Result<PipelineOutcome> {
        config.validate()?;

        let paths = ScannerService::images().discover_paths(root)?;
        log::info!("Discovered {} image files under {}", paths.len(), root.display());
        let (mut files, failures) = open_all(paths);

        let mut summary = self.gate.check(&mut files, config.dry_run);
        summary.files_scanned += failures.len();
        summary.extend_failures(failures);

        let history = History::for_root(root);
        let dedup = self.index.deduplicate(files, config, Some(&history));
        summary.absorb(dedup.summary);

        let clustered = self.clusterer.process_files(dedup.remaining, config);
        summary.absorb(clustered.summary);

        Ok(PipelineOutcome {
            survivors: dedup.survivors,
            groups: clustered.groups,
            summary,
        })
    }
}
