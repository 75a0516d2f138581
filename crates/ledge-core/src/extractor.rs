//! Delta extraction
//!
//! Pure comparison of a working copy's baseline against its live state,
//! producing a [`Delta`] of sorted, path-unique change records. No side
//! effects on the working copy.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::LedgeResult;
use crate::types::{ChangeRecord, Delta, content_digest};
use crate::workspace::WorkingCopy;

/// Computes deltas between a working copy's baseline and live state
pub struct DeltaExtractor;

impl DeltaExtractor {
    /// Compute the delta of every local modification in the working copy
    pub async fn compute_delta(wc: &WorkingCopy) -> LedgeResult<Delta> {
        // Property-only paths (directories included) are part of the
        // comparison set even when no file exists there.
        let mut paths: BTreeSet<PathBuf> = BTreeSet::new();
        paths.extend(wc.baseline_paths().await?);
        paths.extend(wc.live_paths().await?);
        paths.extend(wc.prop_paths().await?);
        paths.extend(wc.baseline_prop_paths().await?);

        let mut records = Vec::new();
        for path in paths {
            let base_content = wc.baseline_read(&path).await?;
            let live_content = wc.read(&path).await?;
            let base_props = wc.baseline_props(&path).await?;
            let live_props = wc.props(&path).await?;

            let record = match (base_content, live_content) {
                (None, Some(content)) => Some(ChangeRecord::add(&path, content, live_props)),
                (Some(base), None) => Some(ChangeRecord::delete(
                    &path,
                    content_digest(&base),
                    base_props,
                )),
                (Some(base), Some(live)) => {
                    let content_changed = base != live;
                    let props_changed = base_props != live_props;
                    if content_changed || props_changed {
                        Some(ChangeRecord::edit(
                            &path,
                            Some(content_digest(&base)),
                            content_changed.then_some(live),
                            base_props,
                            live_props,
                        ))
                    } else {
                        None
                    }
                }
                // No file on either side: a property-only path (directory).
                (None, None) => (base_props != live_props)
                    .then(|| ChangeRecord::edit(&path, None, None, base_props, live_props)),
            };

            if let Some(record) = record {
                records.push(record);
            }
        }

        let delta = Delta::new(records);
        tracing::debug!("extracted delta with {} changed path(s)", delta.len());
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, PropertyMap};
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::fs;

    async fn setup() -> (TempDir, WorkingCopy) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("A")).await.unwrap();
        fs::write(temp.path().join("A/mu"), b"X").await.unwrap();
        let wc = WorkingCopy::init(temp.path()).await.unwrap();
        (temp, wc)
    }

    #[tokio::test]
    async fn test_clean_working_copy_has_empty_delta() {
        let (_temp, wc) = setup().await;
        let delta = DeltaExtractor::compute_delta(&wc).await.unwrap();
        assert!(delta.is_empty());
    }

    #[tokio::test]
    async fn test_detects_text_edit() {
        let (_temp, wc) = setup().await;
        wc.write(Path::new("A/mu"), b"XY").await.unwrap();

        let delta = DeltaExtractor::compute_delta(&wc).await.unwrap();
        assert_eq!(delta.len(), 1);
        let rec = &delta.records()[0];
        assert_eq!(rec.kind, ChangeKind::TextEdit);
        assert_eq!(rec.content.as_deref(), Some(b"XY".as_slice()));
        assert_eq!(rec.base_digest.as_deref(), Some(content_digest(b"X").as_str()));
    }

    #[tokio::test]
    async fn test_detects_add_and_delete() {
        let (_temp, wc) = setup().await;
        wc.write(Path::new("A/new"), b"A new file\n").await.unwrap();
        wc.remove(Path::new("A/mu")).await.unwrap();

        let delta = DeltaExtractor::compute_delta(&wc).await.unwrap();
        assert_eq!(delta.len(), 2);
        assert_eq!(delta.records()[0].kind, ChangeKind::Delete);
        assert!(delta.records()[0].content.is_none());
        assert_eq!(delta.records()[1].kind, ChangeKind::Add);
    }

    #[tokio::test]
    async fn test_detects_property_only_edit_on_file_and_dir() {
        let (_temp, wc) = setup().await;
        let mut props = PropertyMap::new();
        props.insert("p".to_string(), "v".to_string());
        wc.set_props(Path::new("A/mu"), props.clone()).await.unwrap();
        wc.set_props(Path::new("A"), props).await.unwrap();

        let delta = DeltaExtractor::compute_delta(&wc).await.unwrap();
        assert_eq!(delta.len(), 2);
        for rec in delta.records() {
            assert_eq!(rec.kind, ChangeKind::PropertyEdit);
            assert!(rec.content.is_none());
        }
        // Directory record has no content digest.
        assert!(delta.records()[0].base_digest.is_none());
        assert!(delta.records()[1].base_digest.is_some());
    }

    #[tokio::test]
    async fn test_zero_length_add() {
        let (_temp, wc) = setup().await;
        wc.write(Path::new("empty"), b"").await.unwrap();

        let delta = DeltaExtractor::compute_delta(&wc).await.unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.records()[0].content.as_deref(), Some(b"".as_slice()));
    }

    #[tokio::test]
    async fn test_binary_flag() {
        let (_temp, wc) = setup().await;
        wc.write(Path::new("bin"), &[0, 1, 2, 3, 4, 5]).await.unwrap();

        let delta = DeltaExtractor::compute_delta(&wc).await.unwrap();
        assert!(delta.records()[0].binary);
    }
}
