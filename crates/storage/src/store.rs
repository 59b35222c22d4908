//! Key-value store backends
//!
//! An archive is a flat namespace of `/`-separated keys mapped to byte
//! blobs. [`Store`] is the seam between the array layer and the medium:
//!
//! | Backend | Medium | Atomicity of `set` |
//! |---------|--------|--------------------|
//! | [`FilesystemStore`] | one file per key under a root directory | write to a temp file, then rename |
//! | [`MemoryStore`] | `DashMap` | per-entry |
//!
//! Independent processes coordinate only through the medium. Within one
//! process, [`Store::key_lock`] serialises read-modify-write cycles on a
//! single chunk key.

use dashmap::DashMap;
use gridstore_core::{Error, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Shared handle to a store
pub type StoreRef = Arc<dyn Store>;

/// Byte-blob key-value store
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Value under `key`, `None` if absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the value under `key`
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`; absent keys are not an error
    fn erase(&self, key: &str) -> Result<()>;

    /// Remove every key under `prefix`
    fn erase_prefix(&self, prefix: &str) -> Result<()>;

    /// Keys under `prefix`, sorted
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Lock guarding read-modify-write of `key` within this process
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>>;

    /// Check whether `key` is present
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Per-key lock table
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `key`, created on first use
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|p| p == ".." || p.is_empty()) {
        return Err(Error::Storage(format!("invalid store key '{}'", key)));
    }
    Ok(())
}

// ============================================================================
// Filesystem
// ============================================================================

/// Store rooted at a directory, one file per key
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
    locks: KeyLocks,
}

impl FilesystemStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: KeyLocks::new(),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(".tmp-") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                let key: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(key.join("/"));
            }
        }
        Ok(())
    }
}

impl Store for FilesystemStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_of(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::Storage(format!("key '{}' has no parent", key)))?;
        fs::create_dir_all(parent)?;
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(value)?;
        file.sync_data()?;
        drop(file);
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        trace!(key, bytes = value.len(), "stored");
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_of(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn erase_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            for entry in fs::read_dir(&self.root)? {
                let path = entry?.path();
                if path.is_dir() {
                    fs::remove_dir_all(path)?;
                } else {
                    fs::remove_file(path)?;
                }
            }
            return Ok(());
        }
        let path = self.path_of(prefix)?;
        if path.is_file() {
            return self.erase(prefix);
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.get(key)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
    locks: KeyLocks,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check for an empty store
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn erase_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.entries.clear();
            return Ok(());
        }
        let dir = format!("{}/", prefix);
        self.entries.retain(|k, _| k != prefix && !k.starts_with(&dir));
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.get(key)
    }
}
