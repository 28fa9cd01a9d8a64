//! Artifact compression pipeline
//!
//! Algorithm selection is a pure function of (MIME type, size); the codec
//! code is stored in the container header so decode needs no guessing.
//! Compression that expands the payload falls back to storing the original
//! bytes with code `none`.

use crate::error::CompressError;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Payloads below this size are never worth compressing.
pub const MIN_COMPRESS_SIZE: usize = 256;

/// MIME types that arrive pre-compressed.
const ARCHIVE_MIMES: &[&str] = &[
    "application/zip",
    "application/gzip",
    "application/x-7z-compressed",
    "application/x-rar-compressed",
    "application/x-bzip2",
    "application/zstd",
];

/// Wire codec codes for the container header.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionCodec {
    None = 0,
    Gzip = 1,
    Brotli = 2,
    Deflate = 3,
}

impl TryFrom<u8> for CompressionCodec {
    type Error = CompressError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Brotli),
            3 => Ok(Self::Deflate),
            _ => Err(CompressError::UnknownCodec(value)),
        }
    }
}

/// Choose the codec for an artifact payload.
///
/// - tiny payloads and already-compressed media are stored as-is;
/// - structured text compresses best under brotli;
/// - everything else gets gzip.
pub fn select_codec(mime: &str, size: usize) -> CompressionCodec {
    if size < MIN_COMPRESS_SIZE {
        return CompressionCodec::None;
    }
    let mime = mime.to_ascii_lowercase();
    if mime.starts_with("image/")
        || mime.starts_with("video/")
        || mime.starts_with("audio/")
        || ARCHIVE_MIMES.contains(&mime.as_str())
    {
        return CompressionCodec::None;
    }
    if mime.starts_with("text/")
        || mime == "application/json"
        || mime.ends_with("/xml")
        || mime.ends_with("+xml")
    {
        return CompressionCodec::Brotli;
    }
    CompressionCodec::Gzip
}

/// Compress `data` with the chosen codec.
///
/// Returns the output bytes and the codec actually used: if the compressed
/// form is not smaller than the input, the original bytes are returned with
/// [`CompressionCodec::None`].
pub fn compress(
    data: &[u8],
    codec: CompressionCodec,
) -> Result<(Vec<u8>, CompressionCodec), CompressError> {
    let out = match codec {
        CompressionCodec::None => return Ok((data.to_vec(), CompressionCodec::None)),
        CompressionCodec::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| CompressError::CompressionFailed(e.to_string()))?
        }
        CompressionCodec::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| CompressError::CompressionFailed(e.to_string()))?
        }
        CompressionCodec::Brotli => {
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams::default();
            brotli::BrotliCompress(&mut &data[..], &mut out, &params)
                .map_err(|e| CompressError::CompressionFailed(e.to_string()))?;
            out
        }
    };

    if out.len() >= data.len() {
        Ok((data.to_vec(), CompressionCodec::None))
    } else {
        Ok((out, codec))
    }
}

/// Decompress `data` using the codec code stored in the envelope.
pub fn decompress(data: &[u8], codec: CompressionCodec) -> Result<Vec<u8>, CompressError> {
    match codec {
        CompressionCodec::None => Ok(data.to_vec()),
        CompressionCodec::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CompressError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        CompressionCodec::Deflate => {
            let mut out = Vec::new();
            DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CompressError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        CompressionCodec::Brotli => {
            let mut out = Vec::new();
            brotli::BrotliDecompress(&mut &data[..], &mut out)
                .map_err(|e| CompressError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .copied()
            .take(len)
            .collect()
    }

    #[test]
    fn test_selection_small_payload() {
        assert_eq!(select_codec("text/plain", 10), CompressionCodec::None);
    }

    #[test]
    fn test_selection_media_passthrough() {
        assert_eq!(select_codec("image/png", 4096), CompressionCodec::None);
        assert_eq!(select_codec("video/mp4", 4096), CompressionCodec::None);
        assert_eq!(select_codec("audio/ogg", 4096), CompressionCodec::None);
        assert_eq!(select_codec("application/zip", 4096), CompressionCodec::None);
    }

    #[test]
    fn test_selection_text_brotli() {
        assert_eq!(select_codec("text/plain", 4096), CompressionCodec::Brotli);
        assert_eq!(
            select_codec("application/json", 4096),
            CompressionCodec::Brotli
        );
        assert_eq!(
            select_codec("application/xhtml+xml", 4096),
            CompressionCodec::Brotli
        );
    }

    #[test]
    fn test_selection_fallback_gzip() {
        assert_eq!(
            select_codec("application/octet-stream", 4096),
            CompressionCodec::Gzip
        );
        assert_eq!(select_codec("x-unknown/thing", 4096), CompressionCodec::Gzip);
    }

    #[test]
    fn test_roundtrip_all_codecs() {
        let data = compressible(2048);
        for codec in [
            CompressionCodec::Gzip,
            CompressionCodec::Brotli,
            CompressionCodec::Deflate,
        ] {
            let (packed, used) = compress(&data, codec).unwrap();
            assert_eq!(used, codec);
            assert!(packed.len() < data.len());
            assert_eq!(decompress(&packed, used).unwrap(), data);
        }
    }

    #[test]
    fn test_expansion_falls_back_to_none() {
        // Random bytes do not compress; pipeline must store the original.
        let data: Vec<u8> = (0..512).map(|i| (i * 131 % 251) as u8).collect();
        let (packed, used) = compress(&data, CompressionCodec::Brotli).unwrap();
        if used == CompressionCodec::None {
            assert_eq!(packed, data);
        } else {
            assert!(packed.len() < data.len());
        }
    }

    #[test]
    fn test_corrupt_input_fails() {
        let err = decompress(b"definitely not gzip", CompressionCodec::Gzip).unwrap_err();
        assert!(err.to_string().starts_with("decompression_failed"));
    }
}
