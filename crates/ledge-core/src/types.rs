//! Core type definitions for the shelf/checkpoint engine
//!
//! A [`Delta`] is the structured set of local modifications between a working
//! copy and its baseline; a [`Patch`] is the serialized, persistent encoding
//! of a delta; a [`Checkpoint`] is one immutable, versioned unit stored under
//! a shelf name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Ordered mapping of versioned property names to values
pub type PropertyMap = BTreeMap<String, String>;

/// Identifier of the baseline state a delta was computed against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaselineId(pub String);

impl BaselineId {
    /// Create from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BaselineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of change recorded for a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// Path added
    Add,
    /// Path added together with properties
    AddWithProps,
    /// Path deleted
    Delete,
    /// File content changed (properties may have changed too)
    TextEdit,
    /// Only properties changed
    PropertyEdit,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::AddWithProps => write!(f, "add-with-props"),
            Self::Delete => write!(f, "delete"),
            Self::TextEdit => write!(f, "text-edit"),
            Self::PropertyEdit => write!(f, "property-edit"),
        }
    }
}

/// One per-path change within a [`Delta`]
///
/// A delete record carries no content, only the digest of the baseline
/// content so replay can tell an untouched path from a locally modified one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Relative, normalized path
    pub path: PathBuf,
    /// Kind of change
    pub kind: ChangeKind,
    /// Digest of the content at the baseline; `None` when the path did not
    /// exist at the baseline, or was not a file (directory property edits)
    pub base_digest: Option<String>,
    /// Target content; `None` for deletes and property-only edits
    pub content: Option<Vec<u8>>,
    /// Properties at the baseline
    pub base_props: PropertyMap,
    /// Target properties
    pub props: PropertyMap,
    /// Whether the content is binary (NUL byte / invalid UTF-8 heuristic)
    pub binary: bool,
}

impl ChangeRecord {
    /// Record an added path (content may be zero-length)
    pub fn add(path: impl Into<PathBuf>, content: Vec<u8>, props: PropertyMap) -> Self {
        let kind = if props.is_empty() {
            ChangeKind::Add
        } else {
            ChangeKind::AddWithProps
        };
        let binary = is_binary(&content);
        Self {
            path: path.into(),
            kind,
            base_digest: None,
            content: Some(content),
            base_props: PropertyMap::new(),
            props,
            binary,
        }
    }

    /// Record a deleted path
    pub fn delete(path: impl Into<PathBuf>, base_digest: String, base_props: PropertyMap) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Delete,
            base_digest: Some(base_digest),
            content: None,
            base_props,
            props: PropertyMap::new(),
            binary: false,
        }
    }

    /// Record an edited path; `content` is `None` for property-only edits
    pub fn edit(
        path: impl Into<PathBuf>,
        base_digest: Option<String>,
        content: Option<Vec<u8>>,
        base_props: PropertyMap,
        props: PropertyMap,
    ) -> Self {
        let kind = if content.is_some() {
            ChangeKind::TextEdit
        } else {
            ChangeKind::PropertyEdit
        };
        let binary = content.as_deref().map(is_binary).unwrap_or(false);
        Self {
            path: path.into(),
            kind,
            base_digest,
            content,
            base_props,
            props,
            binary,
        }
    }

    /// Property keys this record changes between baseline and target
    pub fn touched_prop_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .base_props
            .keys()
            .chain(self.props.keys())
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys.retain(|k| self.base_props.get(*k) != self.props.get(*k));
        keys
    }
}

/// The structured set of local modifications against a baseline
///
/// Records are kept sorted by path; paths are unique within a delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    records: Vec<ChangeRecord>,
}

impl Delta {
    /// Build a delta from records, sorting by path; on duplicate paths the
    /// first record wins
    pub fn new(mut records: Vec<ChangeRecord>) -> Self {
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records.dedup_by(|a, b| a.path == b.path);
        Self { records }
    }

    /// The per-path change records, sorted by path
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Whether the delta contains no changes
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of changed paths
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Paths touched by this delta
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.records.iter().map(|r| r.path.as_path())
    }
}

/// The serialized, persistent encoding of a delta
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch(Vec<u8>);

impl Patch {
    /// Wrap raw patch bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw patch bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size of the encoded patch in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the patch is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Patches travel inside JSON checkpoint records; base64 keeps them
// binary-safe there.
impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Patch)
            .map_err(serde::de::Error::custom)
    }
}

/// One immutable, versioned unit stored under a shelf name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Shelf this checkpoint belongs to
    pub shelf: String,
    /// Sequence number, monotonically increasing per shelf from 1
    pub sequence: u64,
    /// Baseline the delta was computed against
    pub baseline: BaselineId,
    /// Optional log message
    pub message: Option<String>,
    /// When the checkpoint was created
    pub created_at: DateTime<Utc>,
    /// The serialized delta
    pub patch: Patch,
}

impl Checkpoint {
    /// Create a new checkpoint record
    pub fn new(
        shelf: impl Into<String>,
        sequence: u64,
        baseline: BaselineId,
        message: Option<String>,
        patch: Patch,
    ) -> Self {
        Self {
            shelf: shelf.into(),
            sequence,
            baseline,
            message,
            created_at: Utc::now(),
            patch,
        }
    }
}

/// Summary of a shelf for listing
///
/// The message is the latest checkpoint's log message (most-recent-wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfSummary {
    pub name: String,
    pub message: Option<String>,
    pub checkpoint_count: usize,
}

/// Hex-encoded SHA-256 digest of content bytes
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Binary detection: NUL byte or invalid UTF-8
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0) || std::str::from_utf8(bytes).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kinds() {
        let add = ChangeRecord::add("f", b"x".to_vec(), PropertyMap::new());
        assert_eq!(add.kind, ChangeKind::Add);

        let mut props = PropertyMap::new();
        props.insert("p".to_string(), "v".to_string());
        let add_props = ChangeRecord::add("g", Vec::new(), props.clone());
        assert_eq!(add_props.kind, ChangeKind::AddWithProps);

        let del = ChangeRecord::delete("f", content_digest(b"x"), PropertyMap::new());
        assert_eq!(del.kind, ChangeKind::Delete);
        assert!(del.content.is_none());

        let text = ChangeRecord::edit(
            "f",
            Some(content_digest(b"x")),
            Some(b"y".to_vec()),
            PropertyMap::new(),
            PropertyMap::new(),
        );
        assert_eq!(text.kind, ChangeKind::TextEdit);

        let prop_only = ChangeRecord::edit(
            "f",
            Some(content_digest(b"x")),
            None,
            PropertyMap::new(),
            props,
        );
        assert_eq!(prop_only.kind, ChangeKind::PropertyEdit);
    }

    #[test]
    fn test_touched_prop_keys() {
        let mut base = PropertyMap::new();
        base.insert("keep".to_string(), "same".to_string());
        base.insert("gone".to_string(), "old".to_string());
        let mut new = PropertyMap::new();
        new.insert("keep".to_string(), "same".to_string());
        new.insert("fresh".to_string(), "new".to_string());

        let rec = ChangeRecord::edit("f", None, None, base, new);
        assert_eq!(rec.touched_prop_keys(), vec!["fresh", "gone"]);
    }

    #[test]
    fn test_delta_sorted_paths() {
        let delta = Delta::new(vec![
            ChangeRecord::add("b", Vec::new(), PropertyMap::new()),
            ChangeRecord::add("a", Vec::new(), PropertyMap::new()),
        ]);
        let paths: Vec<_> = delta.paths().collect();
        assert_eq!(paths, vec![Path::new("a"), Path::new("b")]);
    }

    #[test]
    fn test_delta_dedups_duplicate_paths() {
        let delta = Delta::new(vec![
            ChangeRecord::add("f", b"first".to_vec(), PropertyMap::new()),
            ChangeRecord::add("f", b"second".to_vec(), PropertyMap::new()),
        ]);
        assert_eq!(delta.len(), 1);
        assert_eq!(
            delta.records()[0].content.as_deref(),
            Some(b"first".as_slice())
        );
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary(b"\x00\x01\x02"));
        assert!(is_binary(&[0xff, 0xfe]));
        assert!(!is_binary(b"plain text\n"));
        assert!(!is_binary(b""));
    }

    #[test]
    fn test_patch_serde_round_trip() {
        let patch = Patch::from_bytes(vec![0, 1, 2, 255]);
        let json = serde_json::to_string(&patch).unwrap();
        let back: Patch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, patch);
    }
}
