//! Concord Core Library
//!
//! This crate provides the DTU data model, the binary container codec, the
//! compression pipeline, and the hash/signature primitives shared by the
//! Concord knowledge substrate.
//!
//! # Modules
//!
//! - [`types`]: DTU model (tiers, scope flags, layers, subscriptions)
//! - [`codec`]: container envelope encode/decode/verify
//! - [`compress`]: per-MIME artifact compression
//! - [`hash`]: BLAKE3 content hashing and keyed envelope signatures
//! - [`error`]: codec and compression error kinds

pub mod codec;
pub mod compress;
pub mod error;
pub mod hash;
pub mod types;

#[cfg(test)]
mod test_vectors;

pub use codec::{DtuCodec, EncodeResult, VerifyExpectations, VerifyReport};
pub use error::{CodecError, CompressError};
pub use hash::{ContentHash, EnvelopeSignature, SigningKey};
pub use types::*;
