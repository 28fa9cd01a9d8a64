//! Error kinds for the container codec and compression pipeline
//!
//! Errors are sum-typed by kind; display strings are the stable snake_case
//! kind names surface adapters translate from.

use thiserror::Error;

/// Container codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// DTU has no id
    #[error("missing_id")]
    MissingId,

    /// DTU has no human layer; every container must be human-readable
    #[error("missing_human_layer")]
    MissingHumanLayer,

    /// Buffer shorter than the declared content
    #[error("buffer_too_small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// First four bytes are not "CDTU"
    #[error("invalid_magic")]
    InvalidMagic,

    /// Unknown format kind byte
    #[error("unknown_format_kind: {0:#04x}")]
    UnknownFormatKind(u8),

    /// Unknown primary type byte
    #[error("unknown_primary_type: {0:#04x}")]
    UnknownPrimaryType(u8),

    /// A structured layer payload failed to parse
    #[error("layer_decode: {layer}: {detail}")]
    LayerDecode { layer: &'static str, detail: String },

    /// Compression pipeline failure during encode/decode
    #[error(transparent)]
    Compress(#[from] CompressError),
}

/// Compression pipeline errors.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("compression_failed: {0}")]
    CompressionFailed(String),

    #[error("decompression_failed: {0}")]
    DecompressionFailed(String),

    #[error("unknown_compression_codec: {0:#04x}")]
    UnknownCodec(u8),
}
