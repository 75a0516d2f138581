//! Working-copy storage
//!
//! A [`WorkingCopy`] is a directory of live files plus an admin area holding
//! the pristine baseline the engine diffs and reverts against:
//!
//! ```text
//! <root>/                      live files
//! <root>/.ledge/
//!   pristine/                  baseline copy of the tree
//!   base-props.json            baseline properties (path -> name -> value)
//!   props.json                 current properties
//!   baseline                   baseline identifier
//!   shelves/                   default checkpoint store root
//! ```
//!
//! Every mutating operation is all-or-nothing at single-path granularity;
//! property tables are rewritten via temp file + rename.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{LedgeError, LedgeResult};
use crate::types::{BaselineId, PropertyMap, content_digest};

/// Name of the admin directory, always excluded from tree scans
pub const ADMIN_DIR: &str = ".ledge";

type PropsTable = BTreeMap<String, PropertyMap>;

/// A working copy rooted at a directory, with a pristine baseline snapshot
pub struct WorkingCopy {
    root: PathBuf,
}

impl WorkingCopy {
    /// Initialize a working copy: create the admin area and snapshot the
    /// current tree (with empty properties) as the baseline
    pub async fn init(root: impl Into<PathBuf>) -> LedgeResult<Self> {
        let wc = Self { root: root.into() };
        fs::create_dir_all(wc.admin_dir().join("pristine")).await?;
        fs::create_dir_all(wc.shelves_dir()).await?;
        wc.write_props_table(&wc.props_path(), &PropsTable::new())
            .await?;
        wc.rebaseline().await?;
        Ok(wc)
    }

    /// Open an already-initialized working copy, locating its root at
    /// `start` or the nearest ancestor holding the admin directory
    pub async fn open(start: impl Into<PathBuf>) -> LedgeResult<Self> {
        let start = start.into();
        let mut dir = start.as_path();
        loop {
            if dir.join(ADMIN_DIR).is_dir() {
                return Ok(Self {
                    root: dir.to_path_buf(),
                });
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => {
                    return Err(LedgeError::invalid_input(format!(
                        "{start:?} is not inside a working copy (no {ADMIN_DIR} directory)"
                    )));
                }
            }
        }
    }

    /// Root directory of the live tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default location for the checkpoint store of this working copy
    pub fn shelves_dir(&self) -> PathBuf {
        self.admin_dir().join("shelves")
    }

    fn admin_dir(&self) -> PathBuf {
        self.root.join(ADMIN_DIR)
    }

    fn pristine_dir(&self) -> PathBuf {
        self.admin_dir().join("pristine")
    }

    fn props_path(&self) -> PathBuf {
        self.admin_dir().join("props.json")
    }

    fn base_props_path(&self) -> PathBuf {
        self.admin_dir().join("base-props.json")
    }

    fn baseline_path(&self) -> PathBuf {
        self.admin_dir().join("baseline")
    }

    /// Identifier of the current baseline
    pub async fn baseline(&self) -> LedgeResult<BaselineId> {
        let id = fs::read_to_string(self.baseline_path())
            .await
            .map_err(|e| LedgeError::storage(format!("failed to read baseline id: {e}")))?;
        Ok(BaselineId::new(id.trim()))
    }

    /// Read a live file; `None` if the path does not exist as a file
    pub async fn read(&self, path: &Path) -> LedgeResult<Option<Vec<u8>>> {
        read_optional(&self.root.join(normalize_rel(path)?)).await
    }

    /// Write a live file, creating parent directories as needed
    pub async fn write(&self, path: &Path, content: &[u8]) -> LedgeResult<()> {
        let full = self.root.join(normalize_rel(path)?);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgeError::storage(format!("failed to create directory: {e}")))?;
        }
        fs::write(&full, content)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to write {full:?}: {e}")))?;
        Ok(())
    }

    /// Remove a live file; idempotent
    pub async fn remove(&self, path: &Path) -> LedgeResult<()> {
        let full = self.root.join(normalize_rel(path)?);
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LedgeError::storage(format!(
                "failed to remove {full:?}: {e}"
            ))),
        }
    }

    /// Current properties of a path (file or directory)
    pub async fn props(&self, path: &Path) -> LedgeResult<PropertyMap> {
        let table = self.read_props_table(&self.props_path()).await?;
        Ok(table.get(&path_key(path)?).cloned().unwrap_or_default())
    }

    /// Replace the properties of a path; an empty map clears them
    pub async fn set_props(&self, path: &Path, props: PropertyMap) -> LedgeResult<()> {
        let mut table = self.read_props_table(&self.props_path()).await?;
        let key = path_key(path)?;
        if props.is_empty() {
            table.remove(&key);
        } else {
            table.insert(key, props);
        }
        self.write_props_table(&self.props_path(), &table).await
    }

    /// Content of a path at the baseline; `None` if absent there
    pub async fn baseline_read(&self, path: &Path) -> LedgeResult<Option<Vec<u8>>> {
        read_optional(&self.pristine_dir().join(normalize_rel(path)?)).await
    }

    /// Properties of a path at the baseline
    pub async fn baseline_props(&self, path: &Path) -> LedgeResult<PropertyMap> {
        let table = self.read_props_table(&self.base_props_path()).await?;
        Ok(table.get(&path_key(path)?).cloned().unwrap_or_default())
    }

    /// All file paths in the live tree, relative to the root, sorted
    pub async fn live_paths(&self) -> LedgeResult<Vec<PathBuf>> {
        walk_files(&self.root, true).await
    }

    /// All file paths in the baseline tree, relative, sorted
    pub async fn baseline_paths(&self) -> LedgeResult<Vec<PathBuf>> {
        walk_files(&self.pristine_dir(), false).await
    }

    /// All paths carrying current properties
    pub async fn prop_paths(&self) -> LedgeResult<Vec<PathBuf>> {
        let table = self.read_props_table(&self.props_path()).await?;
        Ok(table.keys().map(PathBuf::from).collect())
    }

    /// All paths carrying baseline properties
    pub async fn baseline_prop_paths(&self) -> LedgeResult<Vec<PathBuf>> {
        let table = self.read_props_table(&self.base_props_path()).await?;
        Ok(table.keys().map(PathBuf::from).collect())
    }

    /// Make the live tree and properties byte-identical to the baseline,
    /// removing every local modification
    pub async fn revert_to_baseline(&self) -> LedgeResult<()> {
        for path in self.live_paths().await? {
            self.remove(&path).await?;
        }
        remove_empty_dirs(&self.root).await;

        for path in self.baseline_paths().await? {
            let content = self
                .baseline_read(&path)
                .await?
                .ok_or_else(|| LedgeError::storage(format!("pristine file {path:?} vanished")))?;
            self.write(&path, &content).await?;
        }

        let base = self.read_props_table(&self.base_props_path()).await?;
        self.write_props_table(&self.props_path(), &base).await?;
        tracing::debug!("reverted working copy {:?} to baseline", self.root);
        Ok(())
    }

    /// Promote the current live state to be the new baseline
    pub async fn rebaseline(&self) -> LedgeResult<()> {
        let pristine = self.pristine_dir();
        if pristine.exists() {
            fs::remove_dir_all(&pristine)
                .await
                .map_err(|e| LedgeError::storage(format!("failed to clear pristine: {e}")))?;
        }
        fs::create_dir_all(&pristine).await?;

        let mut manifest = String::new();
        for path in self.live_paths().await? {
            let content = self
                .read(&path)
                .await?
                .ok_or_else(|| LedgeError::storage(format!("live file {path:?} vanished")))?;
            let target = pristine.join(&path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, &content).await?;
            manifest.push_str(&format!(
                "{}\0{}\n",
                path.to_string_lossy(),
                content_digest(&content)
            ));
        }

        let props = self.read_props_table(&self.props_path()).await?;
        self.write_props_table(&self.base_props_path(), &props)
            .await?;
        manifest.push_str(&serde_json::to_string(&props).unwrap_or_default());

        let id = content_digest(manifest.as_bytes());
        fs::write(self.baseline_path(), &id)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to write baseline id: {e}")))?;
        tracing::debug!("rebaselined working copy {:?} as {}", self.root, id);
        Ok(())
    }

    async fn read_props_table(&self, path: &Path) -> LedgeResult<PropsTable> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PropsTable::new()),
            Err(e) => {
                return Err(LedgeError::storage(format!(
                    "failed to read properties {path:?}: {e}"
                )));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| LedgeError::storage(format!("malformed properties {path:?}: {e}")))
    }

    async fn write_props_table(&self, path: &Path, table: &PropsTable) -> LedgeResult<()> {
        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|e| LedgeError::storage(format!("failed to serialize properties: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to write properties: {e}")))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to commit properties: {e}")))?;
        Ok(())
    }
}

/// Normalize a relative path: reject absolute paths, `..`, and the admin area
pub fn normalize_rel(path: &Path) -> LedgeResult<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => {
                return Err(LedgeError::invalid_input(format!(
                    "path {path:?} is not a normalized relative path"
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(LedgeError::invalid_input("empty path"));
    }
    if normalized.starts_with(ADMIN_DIR) {
        return Err(LedgeError::invalid_input(format!(
            "path {path:?} is inside the admin area"
        )));
    }
    Ok(normalized)
}

fn path_key(path: &Path) -> LedgeResult<String> {
    Ok(normalize_rel(path)?.to_string_lossy().replace('\\', "/"))
}

async fn read_optional(full: &Path) -> LedgeResult<Option<Vec<u8>>> {
    match fs::read(full).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        // Reading a directory as a file reports it as absent content.
        Err(_) if full.is_dir() => Ok(None),
        Err(e) => Err(LedgeError::storage(format!(
            "failed to read {full:?}: {e}"
        ))),
    }
}

/// Recursively collect file paths under `root`, relative and sorted,
/// skipping the admin directory when `skip_admin` is set
async fn walk_files(root: &Path, skip_admin: bool) -> LedgeResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| LedgeError::storage(format!("failed to read directory {dir:?}: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LedgeError::storage(format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| LedgeError::storage(format!("failed to stat {path:?}: {e}")))?;
            if file_type.is_dir() {
                if skip_admin && entry.file_name() == ADMIN_DIR && dir == *root {
                    continue;
                }
                stack.push(path);
            } else if file_type.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .map_err(|e| LedgeError::storage(format!("path outside root: {e}")))?;
                files.push(rel.to_path_buf());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Best-effort removal of empty directories left behind after reverts,
/// deepest first; the admin directory is left alone
async fn remove_empty_dirs(root: &Path) {
    let mut dirs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if entry.file_name() == ADMIN_DIR && dir == *root {
                    continue;
                }
                stack.push(entry.path());
                dirs.push(entry.path());
            }
        }
    }

    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        // Fails (and is ignored) when the directory is not empty.
        let _ = fs::remove_dir(&dir).await;
    }
}
