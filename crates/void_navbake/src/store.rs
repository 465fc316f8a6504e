//! Artifact storage - persists baked nav meshes under asset paths
//!
//! An artifact's identity on disk is its asset path. The store keeps the
//! mapping between [`ArtifactId`]s handed out at bake time and the paths they
//! were persisted under.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::artifact::{ArtifactId, BakedNavMesh};
use crate::error::StorageError;

/// Persistent storage for baked artifacts
pub trait ArtifactStore: Send + Sync {
    /// Allocate an identifier for an artifact that is about to be baked
    fn allocate(&self) -> ArtifactId;

    /// Persist an artifact under `path`
    fn create_asset(
        &self,
        id: ArtifactId,
        payload: &BakedNavMesh,
        path: &Path,
    ) -> Result<(), StorageError>;

    /// Delete the asset stored under `path`
    fn delete_asset(&self, path: &Path) -> Result<(), StorageError>;

    /// First free path derived from `base` (`Name.asset`, `Name 1.asset`, ...)
    fn generate_unique_asset_path(&self, base: &Path) -> PathBuf;

    /// Path an artifact is stored under
    fn asset_path(&self, id: ArtifactId) -> Option<PathBuf>;

    /// Read a stored artifact back
    fn load(&self, id: ArtifactId) -> Result<BakedNavMesh, StorageError>;

    /// All stored artifacts
    fn artifact_ids(&self) -> Vec<ArtifactId>;

    /// Check if an artifact is stored
    fn contains(&self, id: ArtifactId) -> bool {
        self.asset_path(id).is_some()
    }

    /// Delete an artifact by ID. Returns `false` when it was never persisted.
    fn delete_artifact(&self, id: ArtifactId) -> Result<bool, StorageError> {
        match self.asset_path(id) {
            Some(path) => self.delete_asset(&path).map(|_| true),
            None => Ok(false),
        }
    }
}

/// Bidirectional artifact/path index shared by the store implementations
#[derive(Default)]
struct AssetIndex {
    by_id: BTreeMap<ArtifactId, PathBuf>,
    by_path: BTreeMap<PathBuf, ArtifactId>,
}

impl AssetIndex {
    fn insert(&mut self, id: ArtifactId, path: PathBuf) -> Result<(), StorageError> {
        if self.by_path.contains_key(&path) {
            return Err(StorageError::AlreadyExists(path));
        }
        if let Some(old) = self.by_id.insert(id, path.clone()) {
            // Re-creating an artifact moves it
            self.by_path.remove(&old);
        }
        self.by_path.insert(path, id);
        Ok(())
    }

    fn remove_path(&mut self, path: &Path) -> Option<ArtifactId> {
        let id = self.by_path.remove(path)?;
        self.by_id.remove(&id);
        Some(id)
    }
}

/// Append ` 1`, ` 2`, ... to the file stem until `is_taken` says the path is free.
pub fn unique_asset_path(base: &Path, is_taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !is_taken(base) {
        return base.to_path_buf();
    }

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = base.extension().map(|e| e.to_string_lossy().to_string());

    let mut counter = 1u32;
    loop {
        let file_name = match &extension {
            Some(ext) => format!("{} {}.{}", stem, counter, ext),
            None => format!("{} {}", stem, counter),
        };
        let candidate = base.with_file_name(file_name);
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// In-memory artifact store for editor sessions without a project on disk
pub struct MemoryArtifactStore {
    index: RwLock<AssetIndex>,
    payloads: RwLock<BTreeMap<ArtifactId, BakedNavMesh>>,
    next_id: AtomicU64,
}

impl MemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            index: RwLock::new(AssetIndex::default()),
            payloads: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored artifacts
    pub fn len(&self) -> usize {
        self.index.read().by_id.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.index.read().by_id.is_empty()
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn allocate(&self) -> ArtifactId {
        ArtifactId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn create_asset(
        &self,
        id: ArtifactId,
        payload: &BakedNavMesh,
        path: &Path,
    ) -> Result<(), StorageError> {
        self.index.write().insert(id, path.to_path_buf())?;
        self.payloads.write().insert(id, payload.clone());
        Ok(())
    }

    fn delete_asset(&self, path: &Path) -> Result<(), StorageError> {
        let id = self
            .index
            .write()
            .remove_path(path)
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        self.payloads.write().remove(&id);
        Ok(())
    }

    fn generate_unique_asset_path(&self, base: &Path) -> PathBuf {
        let index = self.index.read();
        unique_asset_path(base, |p| index.by_path.contains_key(p))
    }

    fn asset_path(&self, id: ArtifactId) -> Option<PathBuf> {
        self.index.read().by_id.get(&id).cloned()
    }

    fn load(&self, id: ArtifactId) -> Result<BakedNavMesh, StorageError> {
        self.payloads.read().get(&id).cloned().ok_or_else(|| {
            StorageError::NotFound(self.asset_path(id).unwrap_or_else(|| PathBuf::from(id.to_string())))
        })
    }

    fn artifact_ids(&self) -> Vec<ArtifactId> {
        self.index.read().by_id.keys().copied().collect()
    }
}

/// Artifact store writing JSON payloads below a project root
pub struct FsArtifactStore {
    root: PathBuf,
    index: RwLock<AssetIndex>,
    next_id: AtomicU64,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Asset paths are relative to it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(AssetIndex::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of an asset path
    pub fn full_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Register an asset that already exists on disk
    pub fn import(&self, path: &Path) -> Result<ArtifactId, StorageError> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        let id = self.allocate();
        self.index.write().insert(id, path.to_path_buf())?;
        log::debug!("Imported nav mesh asset {:?} as {}", path, id);
        Ok(id)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn allocate(&self) -> ArtifactId {
        ArtifactId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn create_asset(
        &self,
        id: ArtifactId,
        payload: &BakedNavMesh,
        path: &Path,
    ) -> Result<(), StorageError> {
        let full = self.full_path(path);
        if full.exists() {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = full.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(payload)?;
        std::fs::write(&full, json)?;

        if let Err(e) = self.index.write().insert(id, path.to_path_buf()) {
            let _ = std::fs::remove_file(&full);
            return Err(e);
        }
        Ok(())
    }

    fn delete_asset(&self, path: &Path) -> Result<(), StorageError> {
        let full = self.full_path(path);
        let indexed = self.index.write().remove_path(path).is_some();
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if indexed {
                    log::warn!("Nav mesh asset {:?} was already gone from disk", path);
                    Ok(())
                } else {
                    Err(StorageError::NotFound(path.to_path_buf()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn generate_unique_asset_path(&self, base: &Path) -> PathBuf {
        let index = self.index.read();
        unique_asset_path(base, |p| {
            index.by_path.contains_key(p) || self.full_path(p).exists()
        })
    }

    fn asset_path(&self, id: ArtifactId) -> Option<PathBuf> {
        self.index.read().by_id.get(&id).cloned()
    }

    fn load(&self, id: ArtifactId) -> Result<BakedNavMesh, StorageError> {
        let path = self
            .asset_path(id)
            .ok_or_else(|| StorageError::NotFound(PathBuf::from(id.to_string())))?;
        let bytes = std::fs::read(self.full_path(&path))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn artifact_ids(&self) -> Vec<ArtifactId> {
        self.index.read().by_id.keys().copied().collect()
    }
}
