//! Upload identity, ordering keys and committed objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

const MAX_NAME_LEN: usize = 255;

fn validate_name(kind: &str, s: &str) -> crate::Result<()> {
    if s.is_empty() || s.len() > MAX_NAME_LEN {
        return Err(crate::Error::InvalidName(format!(
            "{kind} must be 1-{MAX_NAME_LEN} bytes, got {}",
            s.len()
        )));
    }
    if s == "." || s == ".." {
        return Err(crate::Error::InvalidName(format!("{kind} cannot be '{s}'")));
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(crate::Error::InvalidName(format!(
            "{kind} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

/// Caller-chosen name shared by every chunk of one upload.
///
/// Names are restricted to `[A-Za-z0-9._-]` so they can be embedded in
/// object store keys and URL paths without escaping.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadName(String);

impl UploadName {
    /// Parse and validate an upload name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        validate_name("upload name", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UploadName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        validate_name("upload name", &value)?;
        Ok(Self(value))
    }
}

impl From<UploadName> for String {
    fn from(value: UploadName) -> Self {
        value.0
    }
}

impl fmt::Debug for UploadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadName({})", self.0)
    }
}

impl fmt::Display for UploadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a committed object in the object store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    /// Parse and validate an object name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        validate_name("object name", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object store key for the committed object.
    pub fn to_object_key(&self) -> String {
        format!("objects/{}", self.0)
    }
}

impl From<&UploadName> for ObjectName {
    fn from(value: &UploadName) -> Self {
        Self(value.0.clone())
    }
}

impl TryFrom<String> for ObjectName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        validate_name("object name", &value)?;
        Ok(Self(value))
    }
}

impl From<ObjectName> for String {
    fn from(value: ObjectName) -> Self {
        value.0
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({})", self.0)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a chunk within its upload. Complete uploads use keys `0..=n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceKey(u64);

impl SequenceKey {
    pub const FIRST: Self = Self(0);

    /// Largest key accepted; keys are persisted as signed 64-bit integers.
    pub const MAX: Self = Self(i64::MAX as u64);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// The key that must follow this one in a gap-free upload.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl From<u64> for SequenceKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceKey({})", self.0)
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a commit publishes an upload. Unset fields fall back to the upload
/// name and the configured default content type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<ObjectName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl CommitTarget {
    /// Fill fields unset here from `fallback`.
    pub fn or(self, fallback: &CommitTarget) -> CommitTarget {
        CommitTarget {
            object_name: self
                .object_name
                .or_else(|| fallback.object_name.clone()),
            content_type: self
                .content_type
                .or_else(|| fallback.content_type.clone()),
        }
    }
}

/// An immutable object produced by committing an upload's staged blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedObject {
    /// Name the object is visible under.
    pub name: ObjectName,
    /// Content type recorded at commit.
    pub content_type: String,
    /// Total size in bytes (sum of all chunk payloads).
    pub size_bytes: u64,
    /// Number of blocks concatenated into the object.
    pub block_count: u64,
    /// Sequence key of the final chunk.
    pub final_sequence: SequenceKey,
    /// When the commit became visible.
    #[serde(with = "time::serde::rfc3339")]
    pub committed_at: OffsetDateTime,
}
