use image::{DynamicImage, Rgba};
use image_hasher::{HashAlg, HasherConfig};
use std::fmt;

/// Pixels less opaque than this are hashed as black.
const OPAQUE_THRESHOLD: u8 = 253;

/// Fixed-length bit vector. Distances between hashes of different lengths
/// are maximal.
#[derive(Clone, PartialEq, Eq)]
pub struct PerceptualHash {
    bytes: Box<[u8]>,
    bit_len: u32,
}

impl PerceptualHash {
    /// `bit_len` is clamped to the bits actually present in `bytes`.
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>, bit_len: u32) -> Self {
        let bytes = bytes.into();
        let bit_len = bit_len.min((bytes.len() * 8) as u32);
        Self { bytes, bit_len }
    }

    pub fn from_bits(bits: &[bool]) -> Self {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
            bytes[i / 8] |= 1 << (i % 8);
        }
        Self::from_bytes(bytes, bits.len() as u32)
    }

    pub fn bit_len(&self) -> u32 {
        self.bit_len
    }

    fn bit(&self, i: u32) -> bool {
        self.bytes[(i / 8) as usize] & (1 << (i % 8)) != 0
    }

    pub fn hamming(&self, other: &Self) -> Option<u32> {
        if self.bit_len != other.bit_len {
            return None;
        }
        Some((0..self.bit_len).filter(|&i| self.bit(i) != other.bit(i)).count() as u32)
    }

    /// Normalized Hamming distance in [0, 1].
    pub fn distance(&self, other: &Self) -> f64 {
        match self.hamming(other) {
            Some(_) if self.bit_len == 0 => 0.0,
            Some(diff) => f64::from(diff) / f64::from(self.bit_len),
            None => 1.0,
        }
    }
}

impl fmt::Debug for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PerceptualHash({}b:", self.bit_len)?;
        for byte in self.bytes.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Source of perceptual hashes. Implementations must give distance 0 for
/// identical pixels and small distances for visually similar images.
pub trait PerceptualHasher: Send + Sync {
    fn hash_image(&self, image: &DynamicImage) -> PerceptualHash;
}

/// DCT-preprocessed mean hash of `precision` bits.
pub struct DctMeanHasher {
    hasher: image_hasher::Hasher,
    precision: u32,
}

impl DctMeanHasher {
    /// `precision` must be a positive multiple of 8. Square sizes are used
    /// when possible, otherwise an 8-wide grid.
    pub fn new(precision: u32) -> Self {
        let side = f64::from(precision).sqrt() as u32;
        let (width, height) = if side * side == precision {
            (side, side)
        } else {
            (8, precision / 8)
        };
        let hasher = HasherConfig::new()
            .hash_size(width, height)
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .to_hasher();
        Self { hasher, precision }
    }
}

impl PerceptualHasher for DctMeanHasher {
    fn hash_image(&self, image: &DynamicImage) -> PerceptualHash {
        let flattened = flatten_transparency(image);
        let hash = self.hasher.hash_image(flattened.as_ref().unwrap_or(image));
        PerceptualHash::from_bytes(hash.as_bytes().to_vec(), self.precision)
    }
}

/// Replaces mostly transparent pixels with opaque black so that stickers
/// on different backgrounds hash alike. `None` when there is no alpha.
fn flatten_transparency(image: &DynamicImage) -> Option<DynamicImage> {
    if !image.color().has_alpha() {
        return None;
    }
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        *pixel = if pixel[3] < OPAQUE_THRESHOLD {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([pixel[0], pixel[1], pixel[2], 255])
        };
    }
    Some(DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8()))
}
