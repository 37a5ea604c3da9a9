//! Detection and repair of Apple "CgBI" PNGs.
//!
//! Xcode's asset compiler rewrites PNGs into a private variant: an extra
//! `CgBI` chunk ahead of `IHDR`, image data compressed as raw deflate without
//! the zlib wrapper, BGR(A) channel order and premultiplied alpha. Regular
//! decoders either reject these files or show swapped colors. [`repair`]
//! turns one into a standard PNG without touching any other chunk.

use crc32fast::Hasher as Crc32;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};
use thiserror::Error;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const CGBI_MARKER: &[u8; 4] = b"CgBI";
const SNIFF_LEN: usize = 32;
const MAX_CHUNK_LEN: usize = i32::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing PNG signature")]
    NotPng,

    #[error("unexpected end of stream inside {chunk} at offset {offset}")]
    UnexpectedEnd { chunk: String, offset: usize },

    #[error("{chunk} chunk at offset {offset} declares {length} bytes but only {available} remain")]
    BadLength {
        chunk: String,
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("failed to inflate IDAT stream starting at offset {offset}: {message}")]
    Inflate { offset: usize, message: String },

    #[error("IDAT stream starting at offset {offset} holds {actual} bytes, expected {expected}")]
    Truncated {
        offset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{chunk} chunk at offset {offset}: {message}")]
    Malformed {
        chunk: String,
        offset: usize,
        message: String,
    },

    #[error("{chunk} chunk at offset {offset}: unsupported {message}")]
    Unsupported {
        chunk: String,
        offset: usize,
        message: String,
    },

    #[error("stream ended at offset {offset} without an IEND chunk")]
    MissingEnd { offset: usize },

    #[error("failed to recompress image data: {0}")]
    Deflate(String),
}

/// Pixel layouts handled by the repairer, always at 8 bits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorType {
    Grayscale,
    Rgb,
    GrayscaleAlpha,
    Rgba,
}

impl ColorType {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ColorType::Grayscale),
            2 => Some(ColorType::Rgb),
            4 => Some(ColorType::GrayscaleAlpha),
            6 => Some(ColorType::Rgba),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorType::Grayscale => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
}

impl ImageHeader {
    fn parse(data: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let malformed = |message: &str| DecodeError::Malformed {
            chunk: "IHDR".to_string(),
            offset,
            message: message.to_string(),
        };
        let unsupported = |message: String| DecodeError::Unsupported {
            chunk: "IHDR".to_string(),
            offset,
            message,
        };

        if data.len() != 13 {
            return Err(malformed("payload must be 13 bytes"));
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if width == 0 || height == 0 {
            return Err(malformed("zero image dimension"));
        }
        let bit_depth = data[8];
        if bit_depth != 8 {
            return Err(unsupported(format!("bit depth {bit_depth}")));
        }
        let color_type = ColorType::from_code(data[9])
            .ok_or_else(|| unsupported(format!("color type {}", data[9])))?;
        if data[12] != 0 {
            return Err(unsupported("interlaced image".to_string()));
        }

        Ok(Self {
            width,
            height,
            bit_depth,
            color_type,
        })
    }

    /// Bytes per unfiltered scanline.
    fn stride(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.color_type.bytes_per_pixel())
    }
}

struct Chunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
    offset: usize,
}

impl Chunk<'_> {
    fn name(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

/// Walks `length | type | payload | crc` records. Stops after the first error.
struct ChunkReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: PNG_SIGNATURE.len(),
        }
    }

    fn read_chunk(&mut self) -> Result<Chunk<'a>, DecodeError> {
        let offset = self.pos;
        let remaining = &self.bytes[offset..];
        if remaining.len() < 8 {
            return Err(DecodeError::UnexpectedEnd {
                chunk: "chunk header".to_string(),
                offset,
            });
        }

        let length = u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]])
            as usize;
        let kind = [remaining[4], remaining[5], remaining[6], remaining[7]];
        let chunk = String::from_utf8_lossy(&kind).into_owned();
        if length > MAX_CHUNK_LEN {
            return Err(DecodeError::Malformed {
                chunk,
                offset,
                message: format!("length {length} exceeds 2^31 - 1"),
            });
        }

        // payload plus the trailing CRC
        let available = remaining.len() - 8;
        if length + 4 > available {
            return Err(DecodeError::BadLength {
                chunk,
                offset,
                length,
                available,
            });
        }

        self.pos = offset + 8 + length + 4;
        Ok(Chunk {
            kind,
            data: &remaining[8..8 + length],
            offset,
        })
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Result<Chunk<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let result = self.read_chunk();
        if result.is_err() {
            self.pos = self.bytes.len();
        }
        Some(result)
    }
}

/// True when `bytes` start with the PNG signature and carry a `CgBI` marker
/// within the first 32 bytes. Shorter input is never CgBI.
pub fn is_cgbi(bytes: &[u8]) -> bool {
    if bytes.len() < SNIFF_LEN || bytes[..8] != PNG_SIGNATURE {
        return false;
    }
    bytes[8..SNIFF_LEN]
        .windows(CGBI_MARKER.len())
        .any(|window| window == CGBI_MARKER)
}

/// Rewrites a CgBI PNG as a standard PNG.
///
/// The `CgBI` chunk is dropped, every `IDAT` is merged, color-corrected and
/// re-emitted as a single zlib-compressed `IDAT` just before `IEND`. All other
/// chunks keep their payload and position; every CRC is recomputed.
pub fn repair(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(DecodeError::NotPng);
    }

    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 4);
    out.extend_from_slice(&PNG_SIGNATURE);

    let mut header: Option<ImageHeader> = None;
    let mut idat = Vec::new();
    let mut idat_offset: Option<usize> = None;

    for chunk in ChunkReader::new(bytes) {
        let chunk = chunk?;
        match &chunk.kind {
            b"CgBI" => continue,
            b"IHDR" => {
                header = Some(ImageHeader::parse(chunk.data, chunk.offset)?);
                write_chunk(&mut out, b"IHDR", chunk.data);
            }
            b"IDAT" => {
                if header.is_none() {
                    return Err(DecodeError::Malformed {
                        chunk: chunk.name(),
                        offset: chunk.offset,
                        message: "image data without a preceding IHDR".to_string(),
                    });
                }
                idat_offset.get_or_insert(chunk.offset);
                idat.extend_from_slice(chunk.data);
            }
            b"IEND" => {
                if let Some(offset) = idat_offset {
                    let header = header.ok_or_else(|| DecodeError::Malformed {
                        chunk: chunk.name(),
                        offset: chunk.offset,
                        message: "image data without a preceding IHDR".to_string(),
                    })?;
                    let corrected = correct_image_data(&idat, &header, offset)?;
                    write_chunk(&mut out, b"IDAT", &corrected);
                }
                write_chunk(&mut out, b"IEND", &[]);
                return Ok(out);
            }
            kind => write_chunk(&mut out, kind, chunk.data),
        }
    }

    Err(DecodeError::MissingEnd {
        offset: bytes.len(),
    })
}

fn correct_image_data(
    compressed: &[u8],
    header: &ImageHeader,
    offset: usize,
) -> Result<Vec<u8>, DecodeError> {
    let bpp = header.color_type.bytes_per_pixel();
    let height = header.height as usize;
    let (stride, expected) = header
        .stride()
        .and_then(|stride| Some((stride, stride.checked_add(1)?.checked_mul(height)?)))
        .ok_or_else(|| DecodeError::Malformed {
            chunk: "IHDR".to_string(),
            offset,
            message: "image dimensions overflow".to_string(),
        })?;

    let mut filtered = Vec::new();
    DeflateDecoder::new(compressed)
        .take(expected as u64)
        .read_to_end(&mut filtered)
        .map_err(|e| DecodeError::Inflate {
            offset,
            message: e.to_string(),
        })?;
    if filtered.len() < expected {
        return Err(DecodeError::Truncated {
            offset,
            expected,
            actual: filtered.len(),
        });
    }

    let mut raster = unfilter(&filtered, stride, height, bpp);
    match header.color_type {
        ColorType::Rgb | ColorType::Rgba => restore_channels(&mut raster, header.color_type),
        ColorType::Grayscale | ColorType::GrayscaleAlpha => {}
    }

    let refiltered = add_filter_bytes(&raster, stride);
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(compressed.len()), Compression::default());
    encoder
        .write_all(&refiltered)
        .map_err(|e| DecodeError::Deflate(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| DecodeError::Deflate(e.to_string()))
}

/// Reverses per-scanline filtering. `filtered` must hold at least
/// `height * (stride + 1)` bytes. Unknown filter codes copy the raw byte,
/// which silently corrupts the row instead of failing.
fn unfilter(filtered: &[u8], stride: usize, height: usize, bpp: usize) -> Vec<u8> {
    let mut raster = vec![0u8; stride * height];

    for y in 0..height {
        let line = &filtered[y * (stride + 1)..(y + 1) * (stride + 1)];
        let filter = line[0];
        let src = &line[1..];

        let (done, rest) = raster.split_at_mut(y * stride);
        let prev = if y > 0 {
            Some(&done[(y - 1) * stride..])
        } else {
            None
        };
        let row = &mut rest[..stride];

        for x in 0..stride {
            let left = if x >= bpp { row[x - bpp] } else { 0 };
            let up = prev.map_or(0, |p| p[x]);
            let up_left = match prev {
                Some(p) if x >= bpp => p[x - bpp],
                _ => 0,
            };
            let raw = src[x];

            row[x] = match filter {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                _ => raw,
            };
        }
    }

    raster
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// BGR(A) to RGB(A), then undo premultiplied alpha for partially transparent pixels.
fn restore_channels(raster: &mut [u8], color_type: ColorType) {
    let bpp = color_type.bytes_per_pixel();
    for pixel in raster.chunks_exact_mut(bpp) {
        pixel.swap(0, 2);
        if color_type == ColorType::Rgba {
            let alpha = u32::from(pixel[3]);
            if alpha > 0 && alpha < 255 {
                for channel in &mut pixel[..3] {
                    *channel = (u32::from(*channel) * 255 / alpha).min(255) as u8;
                }
            }
        }
    }
}

fn add_filter_bytes(raster: &[u8], stride: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(raster.len() + raster.len() / stride);
    for row in raster.chunks_exact(stride) {
        out.push(0);
        out.extend_from_slice(row);
    }
    out
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);

    let mut crc = Crc32::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.finalize().to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use flate2::write::DeflateEncoder;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn ihdr(width: u32, height: u32, color_type: u8) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, color_type, 0, 0, 0]);
        data
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Builds a CgBI file; each row is `(filter, bytes)` as stored on disk.
    fn cgbi_png(width: u32, height: u32, color_type: u8, rows: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut filtered = Vec::new();
        for (filter, bytes) in rows {
            filtered.push(*filter);
            filtered.extend_from_slice(bytes);
        }
        let compressed = raw_deflate(&filtered);

        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0x50, 0x00, 0x20, 0x06]);
        write_chunk(&mut png, b"IHDR", &ihdr(width, height, color_type));
        let (first, second) = compressed.split_at(compressed.len() / 2);
        write_chunk(&mut png, b"IDAT", first);
        write_chunk(&mut png, b"IDAT", second);
        write_chunk(&mut png, b"IEND", &[]);
        png
    }

    fn chunk_kinds(bytes: &[u8]) -> Vec<[u8; 4]> {
        ChunkReader::new(bytes)
            .map(|chunk| chunk.unwrap().kind)
            .collect()
    }

    fn standard_png() -> Vec<u8> {
        let img = ImageBuffer::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 7]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_detects_cgbi() {
        let png = cgbi_png(1, 1, 2, &[(0, vec![10, 20, 30])]);
        assert!(is_cgbi(&png));
    }

    #[test]
    fn test_standard_png_is_not_cgbi() {
        assert!(!is_cgbi(&standard_png()));
    }

    #[test]
    fn test_short_input_is_not_cgbi() {
        let mut short = PNG_SIGNATURE.to_vec();
        short.extend_from_slice(b"\0\0\0\x04CgBI");
        assert!(short.len() < 32);
        assert!(!is_cgbi(&short));
        assert!(!is_cgbi(&[]));
    }

    #[test]
    fn test_marker_without_signature_is_not_cgbi() {
        let mut png = cgbi_png(1, 1, 2, &[(0, vec![1, 2, 3])]);
        png[1] = b'X';
        assert!(!is_cgbi(&png));
    }

    #[test]
    fn test_single_bgr_pixel_becomes_rgb() {
        let png = cgbi_png(1, 1, 2, &[(0, vec![10, 20, 30])]);
        let repaired = repair(&png).unwrap();

        let img = image::load_from_memory(&repaired).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_premultiplied_alpha_is_undone() {
        // true color (200, 100, 50) at alpha 128, premultiplied and stored as BGRA
        let row = vec![25, 50, 100, 128, 9, 8, 7, 255, 3, 2, 1, 0];
        let png = cgbi_png(3, 1, 6, &[(0, row)]);
        let repaired = repair(&png).unwrap();

        let img = image::load_from_memory(&repaired).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [199, 99, 49, 128]);
        assert_eq!(img.get_pixel(1, 0).0, [7, 8, 9, 255]);
        assert_eq!(img.get_pixel(2, 0).0, [1, 2, 3, 0]);
    }

    #[test]
    fn test_unpremultiply_saturates() {
        let mut raster = vec![200, 200, 200, 100];
        restore_channels(&mut raster, ColorType::Rgba);
        assert_eq!(raster, vec![255, 255, 255, 100]);
    }

    #[test]
    fn test_output_has_no_cgbi_and_zlib_idat() {
        let png = cgbi_png(2, 2, 6, &[(0, vec![1; 8]), (0, vec![2; 8])]);
        let repaired = repair(&png).unwrap();

        assert_eq!(repaired[..8], PNG_SIGNATURE);
        let kinds = chunk_kinds(&repaired);
        assert_eq!(kinds, vec![*b"IHDR", *b"IDAT", *b"IEND"]);

        let idat = ChunkReader::new(&repaired)
            .map(Result::unwrap)
            .find(|chunk| &chunk.kind == b"IDAT")
            .unwrap();
        let mut inflated = Vec::new();
        ZlibDecoder::new(idat.data)
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated.len(), 2 * (2 * 4 + 1));
        assert!(inflated.chunks(9).all(|row| row[0] == 0));
    }

    #[test]
    fn test_repair_output_is_no_longer_cgbi() {
        let png = cgbi_png(4, 4, 2, &vec![(0, vec![90; 12]); 4]);
        let repaired = repair(&png).unwrap();
        assert!(!is_cgbi(&repaired));
    }

    #[test]
    fn test_ancillary_chunks_survive_in_order() {
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0, 0, 0, 0]);
        write_chunk(&mut png, b"IHDR", &ihdr(1, 1, 2));
        write_chunk(&mut png, b"iDOT", &[1, 2, 3, 4]);
        write_chunk(&mut png, b"IDAT", &raw_deflate(&[0, 1, 2, 3]));
        write_chunk(&mut png, b"tEXt", b"Comment\0hi");
        write_chunk(&mut png, b"IEND", &[]);

        let repaired = repair(&png).unwrap();
        assert_eq!(
            chunk_kinds(&repaired),
            vec![*b"IHDR", *b"iDOT", *b"tEXt", *b"IDAT", *b"IEND"]
        );
    }

    #[test]
    fn test_scanline_filters_are_reversed() {
        // raster rows: [10,20,30, 15,25,35] and [11,21,31, 16,26,36]
        let rows = vec![(1, vec![10, 20, 30, 5, 5, 5]), (4, vec![1; 6])];
        let png = cgbi_png(2, 2, 2, &rows);
        let repaired = repair(&png).unwrap();

        let img = image::load_from_memory(&repaired).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(img.get_pixel(1, 0).0, [35, 25, 15]);
        assert_eq!(img.get_pixel(0, 1).0, [31, 21, 11]);
        assert_eq!(img.get_pixel(1, 1).0, [36, 26, 16]);
    }

    #[test]
    fn test_up_and_average_filters() {
        let filtered = [
            3, 10, 20, 30, 10, 15, 20, // average on first row: left / 2
            2, 1, 1, 1, 1, 1, 1, // up
        ];
        let raster = unfilter(&filtered, 6, 2, 3);
        assert_eq!(
            raster,
            vec![10, 20, 30, 15, 25, 35, 11, 21, 31, 16, 26, 36]
        );
    }

    #[test]
    fn test_unknown_filter_passes_raw_bytes() {
        let raster = unfilter(&[9, 4, 5, 6], 3, 1, 3);
        assert_eq!(raster, vec![4, 5, 6]);
    }

    #[test]
    fn test_paeth_predictor() {
        assert_eq!(paeth(0, 10, 0), 10);
        assert_eq!(paeth(11, 15, 10), 15);
        assert_eq!(paeth(10, 10, 10), 10);
        assert_eq!(paeth(200, 0, 0), 200);
    }

    #[test]
    fn test_truncated_chunk_is_rejected() {
        let png = cgbi_png(1, 1, 2, &[(0, vec![10, 20, 30])]);
        let cut = &png[..png.len() - 20];
        assert!(matches!(
            repair(cut),
            Err(DecodeError::BadLength { .. }) | Err(DecodeError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_missing_iend_is_rejected() {
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0, 0, 0, 0]);
        write_chunk(&mut png, b"IHDR", &ihdr(1, 1, 2));
        write_chunk(&mut png, b"IDAT", &raw_deflate(&[0, 1, 2, 3]));

        assert_eq!(
            repair(&png),
            Err(DecodeError::MissingEnd { offset: png.len() })
        );
    }

    #[test]
    fn test_garbage_idat_is_rejected() {
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0, 0, 0, 0]);
        write_chunk(&mut png, b"IHDR", &ihdr(4, 4, 6));
        write_chunk(&mut png, b"IDAT", &[0xFF; 16]);
        write_chunk(&mut png, b"IEND", &[]);

        assert!(matches!(
            repair(&png),
            Err(DecodeError::Inflate { .. }) | Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_short_image_data_is_rejected() {
        // two rows declared, one stored
        let png = cgbi_png(1, 2, 2, &[(0, vec![10, 20, 30])]);
        assert!(matches!(
            repair(&png),
            Err(DecodeError::Truncated {
                expected: 8,
                actual: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let mut header = ihdr(1, 1, 2);
        header[8] = 16;
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0, 0, 0, 0]);
        write_chunk(&mut png, b"IHDR", &header);
        write_chunk(&mut png, b"IEND", &[]);

        let err = repair(&png).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { ref chunk, .. } if chunk == "IHDR"));
    }

    fn header_only(header: &[u8]) -> Vec<u8> {
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0, 0, 0, 0]);
        write_chunk(&mut png, b"IHDR", header);
        write_chunk(&mut png, b"IEND", &[]);
        png
    }

    #[test]
    fn test_interlaced_image_is_unsupported() {
        let mut header = ihdr(1, 1, 2);
        header[12] = 1;
        let err = repair(&header_only(&header)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Unsupported { ref chunk, ref message, .. }
                if chunk == "IHDR" && message.contains("interlaced")
        ));
    }

    #[test]
    fn test_palette_image_is_unsupported() {
        let err = repair(&header_only(&ihdr(1, 1, 3))).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Unsupported { ref chunk, ref message, .. }
                if chunk == "IHDR" && message == "color type 3"
        ));
    }

    #[test]
    fn test_image_data_before_header_is_malformed() {
        let mut png = PNG_SIGNATURE.to_vec();
        write_chunk(&mut png, b"CgBI", &[0, 0, 0, 0]);
        let idat_offset = png.len();
        write_chunk(&mut png, b"IDAT", &raw_deflate(&[0, 1, 2, 3]));
        write_chunk(&mut png, b"IHDR", &ihdr(1, 1, 2));
        write_chunk(&mut png, b"IEND", &[]);

        let err = repair(&png).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed { ref chunk, offset, .. }
                if chunk == "IDAT" && offset == idat_offset
        ));
    }

    #[test]
    fn test_oversized_chunk_length_is_malformed() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        png.extend_from_slice(b"IDAT");
        png.extend_from_slice(&[0; 16]);

        let err = repair(&png).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed { ref chunk, offset: 8, .. } if chunk == "IDAT"
        ));
    }

    #[test]
    fn test_grayscale_keeps_its_samples() {
        let png = cgbi_png(2, 1, 0, &[(0, vec![10, 200])]);
        let repaired = repair(&png).unwrap();

        let img = image::load_from_memory(&repaired).unwrap().to_luma8();
        assert_eq!(img.get_pixel(0, 0).0, [10]);
        assert_eq!(img.get_pixel(1, 0).0, [200]);
    }

    #[test]
    fn test_grayscale_alpha_is_not_unpremultiplied() {
        let png = cgbi_png(2, 1, 4, &[(0, vec![50, 128, 90, 255])]);
        let repaired = repair(&png).unwrap();

        let img = image::load_from_memory(&repaired).unwrap().to_luma_alpha8();
        assert_eq!(img.get_pixel(0, 0).0, [50, 128]);
        assert_eq!(img.get_pixel(1, 0).0, [90, 255]);
    }

    #[test]
    fn test_not_png() {
        assert_eq!(repair(b"GIF89a..."), Err(DecodeError::NotPng));
    }
}
