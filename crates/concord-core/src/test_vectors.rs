//! Container format vectors
//!
//! Pin the byte layout of the envelope header so that other
//! implementations (and future versions of this one) can check themselves
//! against known-good buffers.

use crate::codec::*;
use crate::hash::SigningKey;
use crate::types::*;
use chrono::{TimeZone, Utc};

fn vector_dtu() -> Dtu {
    let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let mut dtu = Dtu::new(
        "dtu_vector_001",
        "Vector",
        "system",
        ScopeFlags::knowledge(vec!["science".to_string()]),
        now,
    );
    dtu.human = Some(HumanLayer {
        title: None,
        summary: "vector".to_string(),
    });
    dtu
}

#[test]
fn test_header_fixed_fields() {
    let codec = DtuCodec::new(SigningKey::from_seed([1; 32]));
    let buffer = codec.encode(&vector_dtu()).unwrap().buffer;

    assert_eq!(&buffer[0..4], b"CDTU");
    assert_eq!(u16::from_le_bytes([buffer[4], buffer[5]]), FORMAT_VERSION);
    assert_eq!(buffer[6], FormatKind::Dtu as u8);
    assert_eq!(buffer[7], PrimaryType::CondensedKnowledge as u8);
    assert_eq!(buffer[8], 0); // no artifact, no compression
    assert_eq!(buffer[9], LAYER_HUMAN);
    // No artifact: artifact size is zero.
    assert_eq!(u64::from_le_bytes(buffer[10..18].try_into().unwrap()), 0);
    // Total size field matches the buffer.
    assert_eq!(
        u64::from_le_bytes(buffer[18..26].try_into().unwrap()),
        buffer.len() as u64
    );
    // Empty MIME region.
    assert_eq!(buffer[26], 0);
    assert!(buffer[27..44].iter().all(|b| *b == 0));
}

#[test]
fn test_header_crc_pins_prefix() {
    let codec = DtuCodec::new(SigningKey::from_seed([1; 32]));
    let buffer = codec.encode(&vector_dtu()).unwrap().buffer;

    let stored = u32::from_le_bytes(buffer[44..48].try_into().unwrap());
    assert_eq!(stored, crc32fast::hash(&buffer[..44]));
}

#[test]
fn test_first_layer_is_human_json() {
    let codec = DtuCodec::new(SigningKey::from_seed([1; 32]));
    let buffer = codec.encode(&vector_dtu()).unwrap().buffer;

    let len = u32::from_le_bytes(buffer[48..52].try_into().unwrap()) as usize;
    let payload = &buffer[52..52 + len];
    let human: HumanLayer = serde_json::from_slice(payload).unwrap();
    assert_eq!(human.summary, "vector");
}

#[test]
fn test_content_hash_stable_across_runs() {
    let codec = DtuCodec::new(SigningKey::from_seed([1; 32]));
    let a = codec.encode(&vector_dtu()).unwrap();
    let b = codec.encode(&vector_dtu()).unwrap();
    assert_eq!(a.content_hash.to_hex(), b.content_hash.to_hex());
    assert_eq!(a.signature.to_hex(), b.signature.to_hex());
}
