//! Shelf management
//!
//! [`ShelfManager`] is the high-level entry point tying the other modules
//! together: it extracts deltas, encodes them as patches, stores them as
//! versioned checkpoints, and replays them back into the working copy.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{LedgeError, LedgeResult};
use crate::extractor::DeltaExtractor;
use crate::replay::{self, ApplyOutcome};
use crate::store::{CheckpointStore, FileCheckpointStore};
use crate::types::ShelfSummary;
use crate::workspace::WorkingCopy;
use crate::codec;

/// Configuration for the shelf manager
#[derive(Debug, Clone)]
pub struct ShelfManagerConfig {
    /// Root of the working copy
    pub wc_root: PathBuf,
    /// Where checkpoints are stored; defaults to the working copy's own
    /// shelves directory
    pub shelves_path: Option<PathBuf>,
}

impl ShelfManagerConfig {
    /// Create a configuration rooted at a working copy
    pub fn new(wc_root: impl Into<PathBuf>) -> Self {
        Self {
            wc_root: wc_root.into(),
            shelves_path: None,
        }
    }

    /// Store checkpoints at an explicit path instead of the default
    pub fn with_shelves_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shelves_path = Some(path.into());
        self
    }
}

/// High-level shelf operations over a working copy and a checkpoint store
pub struct ShelfManager {
    wc: WorkingCopy,
    store: Arc<dyn CheckpointStore>,
}

impl ShelfManager {
    /// Open the working copy at the configured root with file-backed storage
    pub async fn new(config: ShelfManagerConfig) -> LedgeResult<Self> {
        let wc = WorkingCopy::open(&config.wc_root).await?;
        let shelves = match config.shelves_path {
            Some(path) => path,
            None => wc.shelves_dir(),
        };
        let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(shelves));
        Ok(Self { wc, store })
    }

    /// Open the working copy with a caller-provided store backend
    pub async fn with_store(
        config: ShelfManagerConfig,
        store: Arc<dyn CheckpointStore>,
    ) -> LedgeResult<Self> {
        let wc = WorkingCopy::open(&config.wc_root).await?;
        Ok(Self { wc, store })
    }

    /// The working copy this manager operates on
    pub fn working_copy(&self) -> &WorkingCopy {
        &self.wc
    }

    /// Capture the current local modifications as a new checkpoint on the
    /// named shelf, leaving the working copy unchanged
    ///
    /// Returns the sequence number of the new checkpoint. Fails with
    /// [`LedgeError::EmptyDelta`] when there is nothing to capture.
    pub async fn save(&self, name: &str, message: Option<&str>) -> LedgeResult<u64> {
        validate_name(name)?;

        let delta = DeltaExtractor::compute_delta(&self.wc).await?;
        if delta.is_empty() {
            return Err(LedgeError::EmptyDelta);
        }

        let baseline = self.wc.baseline().await?;
        let patch = codec::encode(&delta, &baseline)?;
        let sequence = self
            .store
            .append(name, patch, baseline, message.map(str::to_string))
            .await?;

        tracing::info!(
            "saved checkpoint {} on shelf '{}' ({} path(s))",
            sequence,
            name,
            delta.len()
        );
        Ok(sequence)
    }

    /// Capture local modifications as a checkpoint, then revert the working
    /// copy to its baseline
    pub async fn shelve(&self, name: &str, message: Option<&str>) -> LedgeResult<u64> {
        let sequence = self.save(name, message).await?;
        self.wc.revert_to_baseline().await?;
        tracing::info!("shelved '{}' and reverted the working copy", name);
        Ok(sequence)
    }

    /// Replay a checkpoint from the named shelf back into the working copy
    ///
    /// With `sequence` of `None` the latest checkpoint is used. On success
    /// the applied checkpoint and all earlier ones on the shelf are removed
    /// (the shelf itself disappears when it becomes empty), and the changed
    /// paths are returned. On conflict nothing is written and nothing is
    /// removed; the conflicting paths are reported in the error.
    pub async fn unshelve(&self, name: &str, sequence: Option<u64>) -> LedgeResult<Vec<PathBuf>> {
        validate_name(name)?;

        let checkpoint = self.store.get(name, sequence).await?;
        let outcome = replay::apply(&checkpoint.patch, &self.wc).await?;

        let paths = match outcome {
            ApplyOutcome::Conflicts { paths } => {
                return Err(LedgeError::Conflicts { paths });
            }
            ApplyOutcome::Applied { paths } => paths,
        };

        // The checkpoint is consumed, along with everything older on the
        // same shelf.
        for seq in 1..=checkpoint.sequence {
            self.store.delete_checkpoint(name, seq).await?;
        }
        match self.store.get(name, None).await {
            Ok(_) => {}
            Err(LedgeError::ShelfNotFound { .. }) => {
                self.store.delete_shelf(name).await?;
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            "unshelved checkpoint {} of '{}' ({} path(s))",
            checkpoint.sequence,
            name,
            paths.len()
        );
        Ok(paths)
    }

    /// List all shelves with their latest log message and checkpoint count
    pub async fn list(&self) -> LedgeResult<Vec<ShelfSummary>> {
        self.store.list_shelves().await
    }

    /// Remove a shelf and all of its checkpoints without touching the
    /// working copy
    pub async fn drop_shelf(&self, name: &str) -> LedgeResult<()> {
        validate_name(name)?;
        self.store.delete_shelf(name).await?;
        tracing::info!("dropped shelf '{}'", name);
        Ok(())
    }
}

/// Shelf names must be usable as directory names
fn validate_name(name: &str) -> LedgeResult<()> {
    if name.is_empty() {
        return Err(LedgeError::invalid_input("shelf name must not be empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(LedgeError::invalid_input(format!(
            "invalid shelf name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCheckpointStore;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::fs;

    async fn setup() -> (TempDir, ShelfManager) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("A")).await.unwrap();
        fs::write(temp.path().join("A/mu"), b"X").await.unwrap();
        WorkingCopy::init(temp.path()).await.unwrap();

        let manager = ShelfManager::with_store(
            ShelfManagerConfig::new(temp.path()),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .await
        .unwrap();
        (temp, manager)
    }

    #[tokio::test]
    async fn test_shelve_reverts_and_unshelve_restores() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        let seq = manager.shelve("foo", None).await.unwrap();
        assert_eq!(seq, 1);
        assert_eq!(
            wc.read(Path::new("A/mu")).await.unwrap(),
            Some(b"X".to_vec())
        );

        let paths = manager.unshelve("foo", None).await.unwrap();
        assert_eq!(paths, vec![PathBuf::from("A/mu")]);
        assert_eq!(
            wc.read(Path::new("A/mu")).await.unwrap(),
            Some(b"XY".to_vec())
        );
    }

    #[tokio::test]
    async fn test_save_leaves_working_copy_unchanged() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        manager.save("foo", None).await.unwrap();
        assert_eq!(
            wc.read(Path::new("A/mu")).await.unwrap(),
            Some(b"XY".to_vec())
        );
    }

    #[tokio::test]
    async fn test_empty_delta_is_an_error() {
        let (_temp, manager) = setup().await;
        let err = manager.shelve("foo", None).await.unwrap_err();
        assert!(matches!(err, LedgeError::EmptyDelta));
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_sequences_and_numbered_unshelve() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        assert_eq!(manager.save("foo", None).await.unwrap(), 1);
        wc.write(Path::new("A/mu"), b"XYZ").await.unwrap();
        assert_eq!(manager.save("foo", None).await.unwrap(), 2);

        wc.revert_to_baseline().await.unwrap();

        // Replay the first checkpoint, not the latest.
        manager.unshelve("foo", Some(1)).await.unwrap();
        assert_eq!(
            wc.read(Path::new("A/mu")).await.unwrap(),
            Some(b"XY".to_vec())
        );

        // Checkpoint 2 survives; 1 is consumed.
        let shelves = manager.list().await.unwrap();
        assert_eq!(shelves.len(), 1);
        assert_eq!(shelves[0].checkpoint_count, 1);
        let err = manager.unshelve("foo", Some(1)).await.unwrap_err();
        assert!(matches!(err, LedgeError::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unshelve_latest_removes_shelf() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        manager.save("foo", None).await.unwrap();
        wc.write(Path::new("A/mu"), b"XYZ").await.unwrap();
        manager.shelve("foo", None).await.unwrap();

        manager.unshelve("foo", None).await.unwrap();
        assert!(manager.list().await.unwrap().is_empty());
        let err = manager.unshelve("foo", None).await.unwrap_err();
        assert!(matches!(err, LedgeError::ShelfNotFound { .. }));
    }

    #[tokio::test]
    async fn test_conflict_preserves_shelf_and_working_copy() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        manager.shelve("foo", None).await.unwrap();

        // Diverge before unshelving.
        wc.write(Path::new("A/mu"), b"XZ").await.unwrap();

        let err = manager.unshelve("foo", None).await.unwrap_err();
        match err {
            LedgeError::Conflicts { paths } => {
                assert_eq!(paths, vec![PathBuf::from("A/mu")]);
            }
            other => panic!("expected conflicts, got {other:?}"),
        }
        assert_eq!(
            wc.read(Path::new("A/mu")).await.unwrap(),
            Some(b"XZ".to_vec())
        );
        assert_eq!(manager.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_shows_latest_message() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        manager.save("foo", Some("first")).await.unwrap();
        wc.write(Path::new("A/mu"), b"XYZ").await.unwrap();
        manager.save("foo", Some("second")).await.unwrap();

        let shelves = manager.list().await.unwrap();
        assert_eq!(shelves.len(), 1);
        assert_eq!(shelves[0].message.as_deref(), Some("second"));
        assert_eq!(shelves[0].checkpoint_count, 2);
    }

    #[tokio::test]
    async fn test_drop_shelf() {
        let (_temp, manager) = setup().await;
        let wc = manager.working_copy();

        wc.write(Path::new("A/mu"), b"XY").await.unwrap();
        manager.shelve("foo", None).await.unwrap();
        manager.drop_shelf("foo").await.unwrap();
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let (_temp, manager) = setup().await;
        for name in ["", "a/b", "a\\b", ".", ".."] {
            let err = manager.save(name, None).await.unwrap_err();
            assert!(matches!(err, LedgeError::InvalidInput(_)), "name {name:?}");
        }
    }

    #[tokio::test]
    async fn test_file_backed_manager_defaults_to_admin_shelves() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f"), b"one").await.unwrap();
        WorkingCopy::init(temp.path()).await.unwrap();

        let manager = ShelfManager::new(ShelfManagerConfig::new(temp.path()))
            .await
            .unwrap();
        let wc = manager.working_copy();

        wc.write(Path::new("f"), b"two").await.unwrap();
        manager.shelve("bar", Some("Log message for bar")).await.unwrap();
        assert!(wc.shelves_dir().join("bar").is_dir());

        // A fresh manager over the same working copy sees the shelf.
        let reopened = ShelfManager::new(ShelfManagerConfig::new(temp.path()))
            .await
            .unwrap();
        let shelves = reopened.list().await.unwrap();
        assert_eq!(shelves.len(), 1);
        assert_eq!(shelves[0].name, "bar");
        assert_eq!(shelves[0].message.as_deref(), Some("Log message for bar"));

        reopened.unshelve("bar", None).await.unwrap();
        assert_eq!(wc.read(Path::new("f")).await.unwrap(), Some(b"two".to_vec()));
    }
}
