//! DTU container codec
//!
//! Encodes a DTU into a self-describing byte stream and back. The envelope
//! is the stable external contract: a 48-byte checksummed little-endian
//! header followed by up to four length-prefixed payload layers (human,
//! core, machine, artifact). Human/core/machine layers are JSON; the
//! artifact layer carries raw bytes, compressed per the header codec code.
//!
//! Wire layout:
//!
//! ```text
//! 0..4    magic "CDTU"
//! 4..6    version (u16)
//! 6       format kind (dtu=1, mega=2, hyper=3)
//! 7       primary type
//! 8       compression codec
//! 9       layer bitfield (bit0 human, bit1 core, bit2 machine, bit3 artifact)
//! 10..18  artifact size, uncompressed (u64)
//! 18..26  total size (u64)
//! 26      artifact MIME length
//! 27..44  artifact MIME, zero-padded
//! 44..48  CRC32 of bytes 0..44
//! ```

use crate::compress::{self, CompressionCodec};
use crate::error::CodecError;
use crate::hash::{self, ContentHash, EnvelopeSignature, SigningKey};
use crate::types::{CoreLayer, Dtu, DtuTier, HumanLayer, MachineLayer};
use bytes::{BufMut, BytesMut};

/// Container magic bytes.
pub const MAGIC: [u8; 4] = *b"CDTU";
/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;
/// Fixed header length.
pub const HEADER_LEN: usize = 48;
/// MIME region width inside the header (offset 27..44).
pub const MIME_REGION: usize = 17;
/// MIME type for exported container files.
pub const DTU_MIME: &str = "application/vnd.concord.dtu";

/// Layer bitfield bits.
pub const LAYER_HUMAN: u8 = 1 << 0;
pub const LAYER_CORE: u8 = 1 << 1;
pub const LAYER_MACHINE: u8 = 1 << 2;
pub const LAYER_ARTIFACT: u8 = 1 << 3;

// =============================================================================
// HEADER ENUMS
// =============================================================================

/// Container format kind, derived from the DTU's internal tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FormatKind {
    Dtu = 1,
    Mega = 2,
    Hyper = 3,
}

impl FormatKind {
    /// File extension for exported containers of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Dtu => ".dtu",
            Self::Mega => ".mega.dtu",
            Self::Hyper => ".hyper.dtu",
        }
    }
}

impl From<DtuTier> for FormatKind {
    fn from(tier: DtuTier) -> Self {
        match tier {
            DtuTier::Mega => Self::Mega,
            DtuTier::Hyper => Self::Hyper,
            DtuTier::Shadow | DtuTier::Regular => Self::Dtu,
        }
    }
}

impl TryFrom<u8> for FormatKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Dtu),
            2 => Ok(Self::Mega),
            3 => Ok(Self::Hyper),
            _ => Err(CodecError::UnknownFormatKind(value)),
        }
    }
}

/// Primary content type byte, telling a renderer what the DTU is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PrimaryType {
    PlayAudio = 0x01,
    DisplayImage = 0x02,
    PlayVideo = 0x03,
    RenderDocument = 0x04,
    RenderCode = 0x05,
    DisplayResearch = 0x06,
    DisplayDataset = 0x07,
    Display3d = 0x08,
    CondensedKnowledge = 0x0A,
    CultureMemory = 0x0B,
}

impl PrimaryType {
    /// Stable textual name of the primary type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayAudio => "play_audio",
            Self::DisplayImage => "display_image",
            Self::PlayVideo => "play_video",
            Self::RenderDocument => "render_document",
            Self::RenderCode => "render_code",
            Self::DisplayResearch => "display_research",
            Self::DisplayDataset => "display_dataset",
            Self::Display3d => "display_3d",
            Self::CondensedKnowledge => "condensed_knowledge",
            Self::CultureMemory => "culture_memory",
        }
    }

    /// Map an artifact kind to its primary type.
    ///
    /// Unknown kinds fall back to condensed knowledge; bare text is a
    /// culture memory. A DTU without an artifact is condensed knowledge.
    pub fn from_artifact_kind(kind: Option<&str>) -> Self {
        match kind {
            Some("beat") | Some("song") => Self::PlayAudio,
            Some("illustration") => Self::DisplayImage,
            Some("short_film") => Self::PlayVideo,
            Some("novel") => Self::RenderDocument,
            Some("library") => Self::RenderCode,
            Some("paper") => Self::DisplayResearch,
            Some("dataset") => Self::DisplayDataset,
            Some("3d_model") => Self::Display3d,
            Some("text") => Self::CultureMemory,
            Some(_) | None => Self::CondensedKnowledge,
        }
    }
}

impl TryFrom<u8> for PrimaryType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::PlayAudio),
            0x02 => Ok(Self::DisplayImage),
            0x03 => Ok(Self::PlayVideo),
            0x04 => Ok(Self::RenderDocument),
            0x05 => Ok(Self::RenderCode),
            0x06 => Ok(Self::DisplayResearch),
            0x07 => Ok(Self::DisplayDataset),
            0x08 => Ok(Self::Display3d),
            0x0A => Ok(Self::CondensedKnowledge),
            0x0B => Ok(Self::CultureMemory),
            _ => Err(CodecError::UnknownPrimaryType(value)),
        }
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// Decoded container header.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerHeader {
    pub version: u16,
    pub format: FormatKind,
    pub primary_type: PrimaryType,
    pub compression: CompressionCodec,
    pub layers: u8,
    /// Uncompressed artifact size in bytes.
    pub artifact_size: u64,
    /// Total container size including this header.
    pub total_size: u64,
    /// Artifact MIME, possibly truncated to the 17-byte header region.
    pub artifact_mime: String,
}

impl ContainerHeader {
    pub fn has_layer(&self, bit: u8) -> bool {
        self.layers & bit != 0
    }

    pub fn primary_type_name(&self) -> &'static str {
        self.primary_type.name()
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Output of a successful encode.
#[derive(Clone, Debug)]
pub struct EncodeResult {
    pub buffer: Vec<u8>,
    pub content_hash: ContentHash,
    pub signature: EnvelopeSignature,
    pub total_size: u64,
    pub primary_type: PrimaryType,
    pub layers_present: u8,
}

/// Output of a successful decode.
#[derive(Clone, Debug)]
pub struct DecodeResult {
    pub header: ContainerHeader,
    pub human: Option<HumanLayer>,
    pub core: Option<CoreLayer>,
    pub machine: Option<MachineLayer>,
    /// Decompressed artifact bytes.
    pub artifact_data: Option<Vec<u8>>,
}

/// Expectations for [`DtuCodec::verify`]. Absent fields are not checked.
#[derive(Clone, Copy, Debug, Default)]
pub struct VerifyExpectations {
    pub expected_hash: Option<ContentHash>,
    pub expected_signature: Option<EnvelopeSignature>,
}

/// Integrity report over an encoded buffer.
#[derive(Clone, Copy, Debug)]
pub struct VerifyReport {
    pub header_valid: bool,
    pub hash_match: bool,
    pub signature_valid: bool,
    /// OR of the three failure conditions.
    pub tampered: bool,
}

// =============================================================================
// CODEC
// =============================================================================

/// Encoder/decoder bound to the substrate signing key.
pub struct DtuCodec {
    signing_key: SigningKey,
}

impl DtuCodec {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Encode a DTU into a container buffer.
    ///
    /// Deterministic: identical inputs yield identical buffers and hashes.
    pub fn encode(&self, dtu: &Dtu) -> Result<EncodeResult, CodecError> {
        if dtu.id.is_empty() {
            return Err(CodecError::MissingId);
        }
        let human = dtu.human.as_ref().ok_or(CodecError::MissingHumanLayer)?;

        let format = FormatKind::from(dtu.tier);
        let primary_type = PrimaryType::from_artifact_kind(dtu.artifact.as_ref().map(|a| a.kind.as_str()));

        // Serialize structured layers.
        let human_bytes = serde_json::to_vec(human).map_err(|e| CodecError::LayerDecode {
            layer: "human",
            detail: e.to_string(),
        })?;
        let core_bytes = match &dtu.core {
            Some(core) if !core.is_empty() => {
                Some(serde_json::to_vec(core).map_err(|e| CodecError::LayerDecode {
                    layer: "core",
                    detail: e.to_string(),
                })?)
            }
            _ => None,
        };
        let machine_bytes = match &dtu.machine {
            Some(machine) => Some(serde_json::to_vec(machine).map_err(|e| CodecError::LayerDecode {
                layer: "machine",
                detail: e.to_string(),
            })?),
            None => None,
        };

        // Compress the artifact; the codec actually used lands in the header.
        let (artifact_bytes, compression, artifact_size, mime) = match &dtu.artifact {
            Some(artifact) => {
                let chosen = compress::select_codec(&artifact.mime, artifact.data.len());
                let (packed, used) = compress::compress(&artifact.data, chosen)?;
                (
                    Some(packed),
                    used,
                    artifact.data.len() as u64,
                    artifact.mime.clone(),
                )
            }
            None => (None, CompressionCodec::None, 0, String::new()),
        };

        let mut layers = LAYER_HUMAN;
        if core_bytes.is_some() {
            layers |= LAYER_CORE;
        }
        if machine_bytes.is_some() {
            layers |= LAYER_MACHINE;
        }
        if artifact_bytes.is_some() {
            layers |= LAYER_ARTIFACT;
        }

        let payload_len: usize = [
            Some(&human_bytes),
            core_bytes.as_ref(),
            machine_bytes.as_ref(),
            artifact_bytes.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(|b| 4 + b.len())
        .sum();
        let total_size = (HEADER_LEN + payload_len) as u64;

        let mut buf = BytesMut::with_capacity(total_size as usize);
        buf.put_slice(&MAGIC);
        buf.put_u16_le(FORMAT_VERSION);
        buf.put_u8(format as u8);
        buf.put_u8(primary_type as u8);
        buf.put_u8(compression as u8);
        buf.put_u8(layers);
        buf.put_u64_le(artifact_size);
        buf.put_u64_le(total_size);

        let mime_bytes = mime.as_bytes();
        let mime_len = mime_bytes.len().min(MIME_REGION);
        buf.put_u8(mime_len as u8);
        buf.put_slice(&mime_bytes[..mime_len]);
        buf.put_bytes(0, MIME_REGION - mime_len);

        let crc = crc32fast::hash(&buf[..HEADER_LEN - 4]);
        buf.put_u32_le(crc);

        for section in [
            Some(&human_bytes),
            core_bytes.as_ref(),
            machine_bytes.as_ref(),
            artifact_bytes.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            buf.put_u32_le(section.len() as u32);
            buf.put_slice(section);
        }

        let buffer = buf.to_vec();
        let content_hash = hash::content_hash(&buffer);
        let signature = self.signing_key.sign(&content_hash);

        Ok(EncodeResult {
            buffer,
            content_hash,
            signature,
            total_size,
            primary_type,
            layers_present: layers,
        })
    }

    /// Decode a container buffer.
    pub fn decode(buffer: &[u8]) -> Result<DecodeResult, CodecError> {
        let header = Self::decode_header(buffer)?;

        if (buffer.len() as u64) < header.total_size {
            return Err(CodecError::BufferTooSmall {
                needed: header.total_size as usize,
                have: buffer.len(),
            });
        }

        let mut offset = HEADER_LEN;
        let human = read_section(buffer, &mut offset, header.has_layer(LAYER_HUMAN))?
            .map(|b| {
                serde_json::from_slice::<HumanLayer>(b).map_err(|e| CodecError::LayerDecode {
                    layer: "human",
                    detail: e.to_string(),
                })
            })
            .transpose()?;
        let core = read_section(buffer, &mut offset, header.has_layer(LAYER_CORE))?
            .map(|b| {
                serde_json::from_slice::<CoreLayer>(b).map_err(|e| CodecError::LayerDecode {
                    layer: "core",
                    detail: e.to_string(),
                })
            })
            .transpose()?;
        let machine = read_section(buffer, &mut offset, header.has_layer(LAYER_MACHINE))?
            .map(|b| {
                serde_json::from_slice::<MachineLayer>(b).map_err(|e| CodecError::LayerDecode {
                    layer: "machine",
                    detail: e.to_string(),
                })
            })
            .transpose()?;
        let artifact_data = read_section(buffer, &mut offset, header.has_layer(LAYER_ARTIFACT))?
            .map(|b| compress::decompress(b, header.compression))
            .transpose()?;

        Ok(DecodeResult {
            header,
            human,
            core,
            machine,
            artifact_data,
        })
    }

    /// Parse and validate just the fixed header.
    pub fn decode_header(buffer: &[u8]) -> Result<ContainerHeader, CodecError> {
        if buffer.len() < HEADER_LEN {
            return Err(CodecError::BufferTooSmall {
                needed: HEADER_LEN,
                have: buffer.len(),
            });
        }
        if buffer[0..4] != MAGIC {
            return Err(CodecError::InvalidMagic);
        }

        let version = u16::from_le_bytes(buffer[4..6].try_into().expect("2 bytes"));
        let format = FormatKind::try_from(buffer[6])?;
        let primary_type = PrimaryType::try_from(buffer[7])?;
        let compression =
            CompressionCodec::try_from(buffer[8]).map_err(CodecError::Compress)?;
        let layers = buffer[9];
        let artifact_size = u64::from_le_bytes(buffer[10..18].try_into().expect("8 bytes"));
        let total_size = u64::from_le_bytes(buffer[18..26].try_into().expect("8 bytes"));
        let mime_len = (buffer[26] as usize).min(MIME_REGION);
        let artifact_mime = String::from_utf8_lossy(&buffer[27..27 + mime_len]).into_owned();

        Ok(ContainerHeader {
            version,
            format,
            primary_type,
            compression,
            layers,
            artifact_size,
            total_size,
            artifact_mime,
        })
    }

    /// Check a buffer against its header checksum and, if supplied, the
    /// expected content hash and signature. Never errors: a mangled buffer
    /// is reported, not rejected.
    pub fn verify(&self, buffer: &[u8], expectations: VerifyExpectations) -> VerifyReport {
        let header_valid = buffer.len() >= HEADER_LEN
            && buffer[0..4] == MAGIC
            && u16::from_le_bytes(buffer[4..6].try_into().expect("2 bytes")) == FORMAT_VERSION
            && crc32fast::hash(&buffer[..HEADER_LEN - 4])
                == u32::from_le_bytes(buffer[44..48].try_into().expect("4 bytes"));

        let actual_hash = hash::content_hash(buffer);
        let hash_match = expectations
            .expected_hash
            .map(|expected| expected == actual_hash)
            .unwrap_or(true);
        let signature_valid = expectations
            .expected_signature
            .map(|sig| self.signing_key.verify(&actual_hash, &sig))
            .unwrap_or(true);

        VerifyReport {
            header_valid,
            hash_match,
            signature_valid,
            tampered: !header_valid || !hash_match || !signature_valid,
        }
    }
}

/// Read one length-prefixed layer section, advancing `offset`.
fn read_section<'a>(
    buffer: &'a [u8],
    offset: &mut usize,
    present: bool,
) -> Result<Option<&'a [u8]>, CodecError> {
    if !present {
        return Ok(None);
    }
    if buffer.len() < *offset + 4 {
        return Err(CodecError::BufferTooSmall {
            needed: *offset + 4,
            have: buffer.len(),
        });
    }
    let len = u32::from_le_bytes(buffer[*offset..*offset + 4].try_into().expect("4 bytes")) as usize;
    *offset += 4;
    if buffer.len() < *offset + len {
        return Err(CodecError::BufferTooSmall {
            needed: *offset + len,
            have: buffer.len(),
        });
    }
    let payload = &buffer[*offset..*offset + len];
    *offset += len;
    Ok(Some(payload))
}
