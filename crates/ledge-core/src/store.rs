//! Checkpoint storage backends
//!
//! A shelf is one directory under the store root; each checkpoint is one
//! independently addressable JSON record named by its zero-padded sequence
//! number. Appends write a temporary file and atomically rename it into
//! place, so a partially written checkpoint is never visible.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

use crate::error::{LedgeError, LedgeResult};
use crate::types::{BaselineId, Checkpoint, Patch, ShelfSummary};

/// Trait for checkpoint storage backends
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write a new checkpoint, assigning the next sequence number for the
    /// shelf (1 if the shelf does not yet exist)
    async fn append(
        &self,
        shelf: &str,
        patch: Patch,
        baseline: BaselineId,
        message: Option<String>,
    ) -> LedgeResult<u64>;

    /// Retrieve a checkpoint; `None` sequence means most recent
    async fn get(&self, shelf: &str, sequence: Option<u64>) -> LedgeResult<Checkpoint>;

    /// List shelves with their latest log message and checkpoint count
    async fn list_shelves(&self) -> LedgeResult<Vec<ShelfSummary>>;

    /// Remove all checkpoints for a shelf; idempotent
    async fn delete_shelf(&self, shelf: &str) -> LedgeResult<()>;

    /// Remove one checkpoint; idempotent
    async fn delete_checkpoint(&self, shelf: &str, sequence: u64) -> LedgeResult<()>;
}

/// File-based checkpoint store
///
/// Layout:
/// ```text
/// root/
///   <shelf_name>/
///     000001.json
///     000002.json
/// ```
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shelf_dir(&self, shelf: &str) -> PathBuf {
        self.root.join(shelf)
    }

    fn checkpoint_path(&self, shelf: &str, sequence: u64) -> PathBuf {
        self.shelf_dir(shelf).join(format!("{sequence:06}.json"))
    }

    /// Existing sequence numbers for a shelf, ascending; empty if the shelf
    /// directory does not exist
    async fn sequences(&self, shelf: &str) -> LedgeResult<Vec<u64>> {
        let dir = self.shelf_dir(shelf);
        let mut sequences = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sequences),
            Err(e) => {
                return Err(LedgeError::storage(format!(
                    "failed to read shelf directory {dir:?}: {e}"
                )));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LedgeError::storage(format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            // Temp files and anything else that is not a sequence number are
            // not part of the visible namespace.
            if let Some(stem) = path.file_stem() {
                if let Ok(sequence) = stem.to_string_lossy().parse::<u64>() {
                    sequences.push(sequence);
                }
            }
        }

        sequences.sort_unstable();
        Ok(sequences)
    }

    async fn read_checkpoint(&self, shelf: &str, sequence: u64) -> LedgeResult<Checkpoint> {
        let path = self.checkpoint_path(shelf, sequence);
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LedgeError::version_not_found(shelf, sequence)
            } else {
                LedgeError::storage(format!("failed to read checkpoint {path:?}: {e}"))
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LedgeError::corrupt(format!("malformed checkpoint record {path:?}: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn append(
        &self,
        shelf: &str,
        patch: Patch,
        baseline: BaselineId,
        message: Option<String>,
    ) -> LedgeResult<u64> {
        let dir = self.shelf_dir(shelf);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to create shelf directory: {e}")))?;

        let sequence = self.sequences(shelf).await?.last().copied().unwrap_or(0) + 1;
        let checkpoint = Checkpoint::new(shelf, sequence, baseline, message, patch);

        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| LedgeError::storage(format!("failed to serialize checkpoint: {e}")))?;

        // Write to a temp name, then rename into the visible namespace so an
        // interrupted append never leaves a torn record.
        let tmp = dir.join(format!(".tmp-{sequence:06}"));
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to write checkpoint: {e}")))?;
        fs::rename(&tmp, self.checkpoint_path(shelf, sequence))
            .await
            .map_err(|e| LedgeError::storage(format!("failed to commit checkpoint: {e}")))?;

        tracing::debug!("appended checkpoint {} to shelf '{}'", sequence, shelf);
        Ok(sequence)
    }

    async fn get(&self, shelf: &str, sequence: Option<u64>) -> LedgeResult<Checkpoint> {
        let sequences = self.sequences(shelf).await?;
        let Some(latest) = sequences.last().copied() else {
            return Err(LedgeError::shelf_not_found(shelf));
        };

        let sequence = sequence.unwrap_or(latest);
        if !sequences.contains(&sequence) {
            return Err(LedgeError::version_not_found(shelf, sequence));
        }
        self.read_checkpoint(shelf, sequence).await
    }

    async fn list_shelves(&self) -> LedgeResult<Vec<ShelfSummary>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LedgeError::storage(format!(
                    "failed to read store root: {e}"
                )));
            }
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LedgeError::storage(format!("failed to read directory entry: {e}")))?
        {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let sequences = self.sequences(&name).await?;
            let Some(latest) = sequences.last().copied() else {
                continue;
            };
            let checkpoint = self.read_checkpoint(&name, latest).await?;
            summaries.push(ShelfSummary {
                name,
                message: checkpoint.message,
                checkpoint_count: sequences.len(),
            });
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    async fn delete_shelf(&self, shelf: &str) -> LedgeResult<()> {
        let dir = self.shelf_dir(shelf);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!("deleted shelf '{}'", shelf);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LedgeError::storage(format!(
                "failed to delete shelf '{shelf}': {e}"
            ))),
        }
    }

    async fn delete_checkpoint(&self, shelf: &str, sequence: u64) -> LedgeResult<()> {
        let path = self.checkpoint_path(shelf, sequence);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LedgeError::storage(format!(
                "failed to delete checkpoint {sequence} of '{shelf}': {e}"
            ))),
        }
    }
}

/// In-memory checkpoint store (for testing)
pub struct MemoryCheckpointStore {
    shelves: tokio::sync::RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            shelves: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(
        &self,
        shelf: &str,
        patch: Patch,
        baseline: BaselineId,
        message: Option<String>,
    ) -> LedgeResult<u64> {
        let mut shelves = self.shelves.write().await;
        let checkpoints = shelves.entry(shelf.to_string()).or_default();
        let sequence = checkpoints.last().map(|c| c.sequence).unwrap_or(0) + 1;
        checkpoints.push(Checkpoint::new(shelf, sequence, baseline, message, patch));
        Ok(sequence)
    }

    async fn get(&self, shelf: &str, sequence: Option<u64>) -> LedgeResult<Checkpoint> {
        let shelves = self.shelves.read().await;
        let checkpoints = shelves
            .get(shelf)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LedgeError::shelf_not_found(shelf))?;

        match sequence {
            None => Ok(checkpoints.last().cloned().expect("non-empty")),
            Some(sequence) => checkpoints
                .iter()
                .find(|c| c.sequence == sequence)
                .cloned()
                .ok_or_else(|| LedgeError::version_not_found(shelf, sequence)),
        }
    }

    async fn list_shelves(&self) -> LedgeResult<Vec<ShelfSummary>> {
        let shelves = self.shelves.read().await;
        let mut summaries: Vec<_> = shelves
            .iter()
            .filter(|(_, checkpoints)| !checkpoints.is_empty())
            .map(|(name, checkpoints)| ShelfSummary {
                name: name.clone(),
                message: checkpoints.last().and_then(|c| c.message.clone()),
                checkpoint_count: checkpoints.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    async fn delete_shelf(&self, shelf: &str) -> LedgeResult<()> {
        self.shelves.write().await.remove(shelf);
        Ok(())
    }

    async fn delete_checkpoint(&self, shelf: &str, sequence: u64) -> LedgeResult<()> {
        if let Some(checkpoints) = self.shelves.write().await.get_mut(shelf) {
            checkpoints.retain(|c| c.sequence != sequence);
        }
        Ok(())
    }
}
