//! Test fixtures for generating test data.

use bytes::Bytes;
use ferry_core::{ChunkRecord, SequenceKey, UploadName};

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Parse an upload name, panicking on invalid input.
#[allow(dead_code)]
pub fn upload_name(name: &str) -> UploadName {
    UploadName::parse(name).expect("valid upload name")
}

/// Build a chunk record as the coordinator would.
#[allow(dead_code)]
pub fn chunk_record(upload: &str, sequence: u64, data: &[u8], is_final: bool) -> ChunkRecord {
    ChunkRecord::new(upload_name(upload), SequenceKey::new(sequence), data, is_final)
}

/// Split `data` into `pieces` roughly equal slices.
#[allow(dead_code)]
pub fn split_into(data: &Bytes, pieces: usize) -> Vec<Bytes> {
    let size = data.len().div_ceil(pieces).max(1);
    (0..data.len())
        .step_by(size)
        .map(|start| data.slice(start..(start + size).min(data.len())))
        .collect()
}
