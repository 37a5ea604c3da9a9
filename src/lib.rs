//! Normalization and deduplication for sticker packs: repairs Apple CgBI
//! PNGs, removes byte-identical copies and groups visually similar images
//! under a stable five-digit prefix.

pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod summary;

pub use config::{Config, ConfigError, DuplicateAction};
pub use error::{DedupError, Result};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use summary::{FileFailure, RunSummary, Stage};
