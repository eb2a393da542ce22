//! Cache store collaborators.
//!
//! A store maps a [`CacheKey`] to one opaque blob. The caller opens the store
//! and owns its lifetime; the join engine only reads and writes entries.

use crate::{CacheError, CacheKey};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait CacheStore: Send + Sync {
    /// The stored blob for `key`, or `None` when absent.
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Persist `payload` under `key`, replacing any previous entry.
    fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError>;

    fn contains(&self, key: &CacheKey) -> bool {
        matches!(self.load(key), Ok(Some(_)))
    }
}

/// One file per key under a caller-owned directory.
///
/// Entries are written to a temporary file in the same directory and renamed
/// into place, so concurrent writers of one key never leave a torn entry.
#[derive(Debug, Clone)]
pub struct DirCacheStore {
    root: PathBuf,
    prefix: String,
}

impl DirCacheStore {
    /// Open (creating if needed) a cache directory. `prefix` is prepended to
    /// every entry's file name.
    pub fn open(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            prefix: prefix.into(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}{}.json", self.prefix, key.as_str()))
    }
}

impl CacheStore for DirCacheStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let io_err = |source: io::Error| CacheError::Io {
            path: path.clone(),
            source,
        };

        let mut staged = tempfile::NamedTempFile::new_in(&self.root).map_err(io_err)?;
        staged.write_all(payload).map_err(io_err)?;
        staged.flush().map_err(io_err)?;
        staged
            .persist(&path)
            .map_err(|err| io_err(err.error))?;
        tracing::trace!(key = %key, path = %path.display(), "cache entry written");
        Ok(())
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }
}

/// In-process store, useful for tests and for sharing results between
/// invocations within one program.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key.as_str()).cloned())
    }

    fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.as_str().to_owned(), payload.to_vec());
        Ok(())
    }
}
