use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::cgbi::DecodeError;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Malformed PNG stream: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rename target {} already exists, keeping {}", target.display(), source_path.display())]
    Collision { source_path: PathBuf, target: PathBuf },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Image decoding failed for {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl DedupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DedupError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = DedupError> = std::result::Result<T, E>;
