pub mod cgbi;
pub mod duplicate;
pub mod file;
pub mod hash;
pub mod integrity;
pub mod naming;
pub mod perceptual;
pub mod scanner;
pub mod similarity;
pub mod union_find;

pub use cgbi::{DecodeError, is_cgbi, repair};
pub use duplicate::{DedupOutcome, ExactDuplicateIndex};
pub use file::ImageFile;
pub use integrity::IntegrityGate;
pub use perceptual::{DctMeanHasher, PerceptualHash, PerceptualHasher};
pub use similarity::{ClusterOutcome, SimilarityClusterer};
