//! Chunk records, staged block identifiers and commit ordering.

use crate::hash::ContentHash;
use crate::upload::{CommitTarget, SequenceKey, UploadName};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Hex digits of the content hash embedded in a block id.
const BLOCK_HASH_PREFIX_LEN: usize = 16;

/// Width of the zero-padded sequence key (enough for `u64::MAX`).
const BLOCK_SEQUENCE_WIDTH: usize = 20;

/// Identifier of a staged block.
///
/// Derived from the chunk's sequence key and content hash, so restaging the
/// same chunk always targets the same block and ids sort in upload order.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId(String);

impl BlockId {
    /// Derive the block id for a chunk.
    pub fn derive(sequence: SequenceKey, hash: &ContentHash) -> Self {
        let hex = hash.to_hex();
        Self(format!(
            "{:0width$}-{}",
            sequence.get(),
            &hex[..BLOCK_HASH_PREFIX_LEN],
            width = BLOCK_SEQUENCE_WIDTH
        ))
    }

    /// Parse a block id previously produced by [`BlockId::derive`].
    pub fn parse(s: &str) -> crate::Result<Self> {
        let Some((seq, hash)) = s.split_once('-') else {
            return Err(crate::Error::InvalidBlockId(s.to_string()));
        };
        let well_formed = seq.len() == BLOCK_SEQUENCE_WIDTH
            && seq.bytes().all(|b| b.is_ascii_digit())
            && seq.parse::<u64>().is_ok()
            && hash.len() == BLOCK_HASH_PREFIX_LEN
            && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(crate::Error::InvalidBlockId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object store key of the staged block.
    pub fn to_object_key(&self, upload: &UploadName) -> String {
        format!("blocks/{}/{}", upload, self.0)
    }
}

impl TryFrom<String> for BlockId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<BlockId> for String {
    fn from(value: BlockId) -> Self {
        value.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable record of one received chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Upload the chunk belongs to.
    pub upload: UploadName,
    /// Position within the upload.
    pub sequence: SequenceKey,
    /// Staged block holding the payload.
    pub block_id: BlockId,
    /// SHA-256 of the payload.
    pub content_hash: ContentHash,
    /// Payload length in bytes.
    pub size_bytes: u64,
    /// True only on the chunk that closes the upload.
    pub is_final: bool,
    /// When the chunk was received.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Commit target sent with the final chunk. Empty on other chunks.
    #[serde(default)]
    pub target: CommitTarget,
}

impl ChunkRecord {
    /// Build the record for a freshly received payload.
    pub fn new(upload: UploadName, sequence: SequenceKey, data: &[u8], is_final: bool) -> Self {
        let content_hash = ContentHash::compute(data);
        Self {
            block_id: BlockId::derive(sequence, &content_hash),
            upload,
            sequence,
            content_hash,
            size_bytes: data.len() as u64,
            is_final,
            created_at: OffsetDateTime::now_utc(),
            target: CommitTarget::default(),
        }
    }

    /// Attach the commit target. Kept only on the final chunk.
    pub fn with_target(mut self, target: CommitTarget) -> Self {
        if self.is_final {
            self.target = target;
        }
        self
    }

    /// Whether `other` describes the same chunk, so a resend is an idempotent retry.
    /// The commit target does not take part.
    pub fn same_chunk(&self, other: &ChunkRecord) -> bool {
        self.upload == other.upload
            && self.sequence == other.sequence
            && self.content_hash == other.content_hash
            && self.is_final == other.is_final
    }
}

/// Sort an upload's records into commit order and verify the set is complete.
///
/// A complete upload has keys `0..=n` without gaps or repeats and exactly one
/// final chunk, which carries key `n`.
pub fn order_for_commit(mut records: Vec<ChunkRecord>) -> crate::Result<Vec<ChunkRecord>> {
    if records.is_empty() {
        return Err(crate::Error::IncompleteUpload(
            "no chunks recorded".to_string(),
        ));
    }
    records.sort_by_key(|r| r.sequence);

    let finals: Vec<SequenceKey> = records
        .iter()
        .filter(|r| r.is_final)
        .map(|r| r.sequence)
        .collect();
    match finals.as_slice() {
        [] => {
            return Err(crate::Error::IncompleteUpload(
                "final chunk not received".to_string(),
            ));
        }
        [_] => {}
        many => {
            let keys: Vec<String> = many.iter().map(ToString::to_string).collect();
            return Err(crate::Error::IncompleteUpload(format!(
                "multiple final chunks at keys {}",
                keys.join(", ")
            )));
        }
    }

    let final_key = finals[0];
    if let Some(last) = records.last()
        && last.sequence != final_key
    {
        return Err(crate::Error::IncompleteUpload(format!(
            "chunk {} follows final chunk {}",
            last.sequence, final_key
        )));
    }

    for pair in records.windows(2) {
        if pair[0].sequence == pair[1].sequence {
            return Err(crate::Error::IncompleteUpload(format!(
                "duplicate sequence key {}",
                pair[0].sequence
            )));
        }
    }

    let keys: Vec<SequenceKey> = records.iter().map(|r| r.sequence).collect();
    let missing = missing_keys(&keys, final_key, 8);
    if !missing.is_empty() {
        let listed: Vec<String> = missing.iter().map(ToString::to_string).collect();
        return Err(crate::Error::IncompleteUpload(format!(
            "missing sequence keys {}",
            listed.join(", ")
        )));
    }

    Ok(records)
}

/// Keys in `0..=last` absent from the ascending `present` list, up to `limit` of them.
pub fn missing_keys(present: &[SequenceKey], last: SequenceKey, limit: usize) -> Vec<SequenceKey> {
    let mut missing = Vec::new();
    let mut expected = 0u64;
    for key in present.iter().map(SequenceKey::get) {
        if key > last.get() {
            break;
        }
        while expected < key && missing.len() < limit {
            missing.push(SequenceKey::new(expected));
            expected += 1;
        }
        if missing.len() >= limit {
            return missing;
        }
        expected = key.saturating_add(1);
    }
    while expected <= last.get() && missing.len() < limit {
        missing.push(SequenceKey::new(expected));
        match expected.checked_add(1) {
            Some(next) => expected = next,
            None => break,
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> UploadName {
        UploadName::parse("report.zip").unwrap()
    }

    fn record(seq: u64, data: &[u8], is_final: bool) -> ChunkRecord {
        ChunkRecord::new(upload(), SequenceKey::new(seq), data, is_final)
    }

    #[test]
    fn test_block_id_is_deterministic() {
        let hash = ContentHash::compute(b"AA");
        let a = BlockId::derive(SequenceKey::new(7), &hash);
        let b = BlockId::derive(SequenceKey::new(7), &hash);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("00000000000000000007-"));
        assert_eq!(BlockId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn test_block_id_differs_by_content_and_position() {
        let aa = ContentHash::compute(b"AA");
        let bb = ContentHash::compute(b"BB");
        assert_ne!(
            BlockId::derive(SequenceKey::new(1), &aa),
            BlockId::derive(SequenceKey::new(1), &bb)
        );
        assert_ne!(
            BlockId::derive(SequenceKey::new(1), &aa),
            BlockId::derive(SequenceKey::new(2), &aa)
        );
    }

    #[test]
    fn test_block_ids_sort_in_sequence_order() {
        let hash = ContentHash::compute(b"x");
        let nine = BlockId::derive(SequenceKey::new(9), &hash);
        let ten = BlockId::derive(SequenceKey::new(10), &hash);
        assert!(nine < ten);
    }

    #[test]
    fn test_block_id_parse_rejects_garbage() {
        for bad in ["", "abc", "1-abcdef0123456789", "00000000000000000001-XYZ"] {
            assert!(BlockId::parse(bad).is_err(), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn test_same_chunk_detects_conflicts() {
        let a = record(0, b"AA", false);
        assert!(a.same_chunk(&record(0, b"AA", false)));
        assert!(!a.same_chunk(&record(0, b"ZZ", false)));
        assert!(!a.same_chunk(&record(0, b"AA", true)));

        let targeted = record(1, b"BB", true).with_target(CommitTarget {
            object_name: None,
            content_type: Some("text/plain".to_string()),
        });
        assert!(targeted.same_chunk(&record(1, b"BB", true)));
    }

    #[test]
    fn test_target_kept_only_on_final_chunk() {
        let target = CommitTarget {
            object_name: None,
            content_type: Some("text/plain".to_string()),
        };
        assert_eq!(
            record(0, b"AA", false).with_target(target.clone()).target,
            CommitTarget::default()
        );
        assert_eq!(record(1, b"BB", true).with_target(target.clone()).target, target);
    }

    #[test]
    fn test_order_for_commit_sorts_out_of_order_arrivals() {
        let ordered = order_for_commit(vec![
            record(2, b"CC", true),
            record(0, b"AA", false),
            record(1, b"BB", false),
        ])
        .unwrap();
        let keys: Vec<u64> = ordered.iter().map(|r| r.sequence.get()).collect();
        assert_eq!(keys, vec![0, 1, 2]);
    }

    #[test]
    fn test_order_for_commit_single_final_chunk() {
        let ordered = order_for_commit(vec![record(0, b"only", true)]).unwrap();
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn test_order_for_commit_requires_final() {
        let err = order_for_commit(vec![record(0, b"AA", false), record(1, b"BB", false)])
            .unwrap_err();
        assert!(err.to_string().contains("final chunk not received"));
    }

    #[test]
    fn test_order_for_commit_rejects_gaps() {
        let err = order_for_commit(vec![record(0, b"AA", false), record(2, b"CC", true)])
            .unwrap_err();
        assert!(err.to_string().contains("missing sequence keys 1"));

        let err = order_for_commit(vec![record(1, b"BB", true)]).unwrap_err();
        assert!(err.to_string().contains("missing sequence keys 0"));
    }

    #[test]
    fn test_order_for_commit_rejects_chunk_after_final() {
        let err = order_for_commit(vec![
            record(0, b"AA", false),
            record(1, b"BB", true),
            record(2, b"CC", false),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("follows final chunk"));
    }

    #[test]
    fn test_order_for_commit_rejects_multiple_finals() {
        let err = order_for_commit(vec![record(0, b"AA", true), record(1, b"BB", true)])
            .unwrap_err();
        assert!(err.to_string().contains("multiple final chunks"));
    }

    #[test]
    fn test_order_for_commit_rejects_empty() {
        assert!(order_for_commit(Vec::new()).is_err());
    }

    #[test]
    fn test_missing_keys() {
        let present: Vec<SequenceKey> = [0u64, 2, 5].into_iter().map(SequenceKey::new).collect();
        let missing: Vec<u64> = missing_keys(&present, SequenceKey::new(6), 10)
            .into_iter()
            .map(|k| k.get())
            .collect();
        assert_eq!(missing, vec![1, 3, 4, 6]);

        let capped = missing_keys(&present, SequenceKey::new(6), 2);
        assert_eq!(capped.len(), 2);

        assert!(missing_keys(&present[..1], SequenceKey::new(0), 10).is_empty());
    }
}
