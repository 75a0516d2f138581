//! Patch codec
//!
//! Serializes a [`Delta`] into a self-describing, binary-safe patch document
//! and deserializes it back. Decoding never depends on external state:
//! the document carries a format version, the baseline identifier, and for
//! every record the declared content length next to the base64 payload.
//!
//! Round-trip law: `decode(&encode(&d, &b)?)? == (d, b)` for every delta,
//! including zero-length added files, arbitrary binary bytes and
//! property-only records.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{LedgeError, LedgeResult};
use crate::types::{BaselineId, ChangeKind, ChangeRecord, Delta, Patch, PropertyMap};

/// Current patch document format version
const PATCH_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PatchDocument {
    format: u32,
    baseline: String,
    records: Vec<PatchRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PatchRecord {
    path: String,
    kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_digest: Option<String>,
    /// Declared byte length of `content`; checked against the decoded payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_len: Option<u64>,
    /// Base64-encoded target content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default)]
    base_props: PropertyMap,
    #[serde(default)]
    props: PropertyMap,
    #[serde(default)]
    binary: bool,
}

/// Encode a delta and its baseline into a patch
pub fn encode(delta: &Delta, baseline: &BaselineId) -> LedgeResult<Patch> {
    let records = delta
        .records()
        .iter()
        .map(|rec| PatchRecord {
            path: path_to_string(&rec.path),
            kind: rec.kind,
            base_digest: rec.base_digest.clone(),
            content_len: rec.content.as_ref().map(|c| c.len() as u64),
            content: rec.content.as_ref().map(|c| BASE64.encode(c)),
            base_props: rec.base_props.clone(),
            props: rec.props.clone(),
            binary: rec.binary,
        })
        .collect();

    let document = PatchDocument {
        format: PATCH_FORMAT,
        baseline: baseline.as_str().to_string(),
        records,
    };

    let bytes = serde_json::to_vec_pretty(&document)
        .map_err(|e| LedgeError::storage(format!("failed to serialize patch: {e}")))?;
    Ok(Patch::from_bytes(bytes))
}

/// Decode a patch back into its delta and baseline
///
/// Fails with [`LedgeError::CorruptPatch`] on malformed structure, unknown
/// format version, undecodable payloads, declared-length mismatch, or
/// duplicate paths.
pub fn decode(patch: &Patch) -> LedgeResult<(Delta, BaselineId)> {
    let document: PatchDocument = serde_json::from_slice(patch.as_bytes())
        .map_err(|e| LedgeError::corrupt(format!("malformed patch document: {e}")))?;

    if document.format != PATCH_FORMAT {
        return Err(LedgeError::corrupt(format!(
            "unsupported patch format {}",
            document.format
        )));
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::with_capacity(document.records.len());

    for rec in document.records {
        if !seen.insert(rec.path.clone()) {
            return Err(LedgeError::corrupt(format!(
                "duplicate path '{}' in patch",
                rec.path
            )));
        }

        let content = match (&rec.content, rec.content_len) {
            (Some(encoded), Some(declared)) => {
                let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    LedgeError::corrupt(format!("undecodable content for '{}': {e}", rec.path))
                })?;
                if bytes.len() as u64 != declared {
                    return Err(LedgeError::corrupt(format!(
                        "content length mismatch for '{}': declared {declared}, got {}",
                        rec.path,
                        bytes.len()
                    )));
                }
                Some(bytes)
            }
            (None, None) => None,
            _ => {
                return Err(LedgeError::corrupt(format!(
                    "record for '{}' declares content without payload or vice versa",
                    rec.path
                )));
            }
        };

        records.push(ChangeRecord {
            path: PathBuf::from(&rec.path),
            kind: rec.kind,
            base_digest: rec.base_digest,
            content,
            base_props: rec.base_props,
            props: rec.props,
            binary: rec.binary,
        });
    }

    Ok((Delta::new(records), BaselineId::new(document.baseline)))
}

fn path_to_string(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
