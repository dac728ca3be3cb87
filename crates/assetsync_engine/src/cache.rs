//! Size-bounded on-disk cache.
//!
//! One file per key in the cache root, plus an `index.json` that records
//! sizes and logical access stamps. All mutations go through one lock so the
//! usage counter stays equal to the sum of entry sizes even when several
//! operations insert and evict concurrently.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::eviction::{EntryView, EvictionPolicy};
use crate::persist::{ensure_dir, AtomicFileWriter, PersistError};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("index error: {0}")]
    Index(#[from] serde_json::Error),
    #[error("entry {0} is in use")]
    Pinned(String),
}

/// Stable cache key for a source reference: hex SHA-256.
pub fn cache_key(reference: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn is_cache_key(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub policy: EvictionPolicy,
}

impl CacheSettings {
    pub fn new(root: impl Into<PathBuf>, policy: EvictionPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_access: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
    pub oversized_kept: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    size_bytes: u64,
    last_access: u64,
}

#[derive(Debug)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    clock: u64,
    pins: HashMap<String, usize>,
    policy: EvictionPolicy,
}

impl CacheIndex {
    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, entry: CacheEntry) {
        if let Some(previous) = self.entries.insert(entry.key.clone(), entry.clone()) {
            self.release(previous.size_bytes);
        }
        self.total_bytes += entry.size_bytes;
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.release(entry.size_bytes);
        Some(entry)
    }

    fn release(&mut self, size_bytes: u64) {
        match self.total_bytes.checked_sub(size_bytes) {
            Some(total) => self.total_bytes = total,
            None => {
                engine_error!(
                    "cache usage counter underflow ({} - {}), recomputing",
                    self.total_bytes,
                    size_bytes
                );
                self.total_bytes = self.entries.values().map(|e| e.size_bytes).sum();
            }
        }
    }

    fn is_pinned(&self, key: &str) -> bool {
        self.pins.get(key).copied().unwrap_or(0) > 0
    }

    fn views(&self) -> Vec<EntryView> {
        self.entries
            .values()
            .map(|e| EntryView {
                key: e.key.clone(),
                size_bytes: e.size_bytes,
                last_access: e.last_access,
                pinned: self.is_pinned(&e.key),
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    writer: AtomicFileWriter,
    inner: Mutex<CacheIndex>,
}

impl CacheStore {
    /// Open (or create) the cache at `settings.root`.
    ///
    /// Entries whose file vanished are dropped; key-named files missing from
    /// the index are adopted as least recently used; anything else in the
    /// root (e.g. temp files of interrupted writes) is removed.
    pub fn open(settings: CacheSettings) -> Result<Self, CacheError> {
        ensure_dir(&settings.root)?;
        let root = settings.root;

        let records = load_index(&root);
        let mut index = CacheIndex {
            entries: HashMap::new(),
            total_bytes: 0,
            clock: 0,
            pins: HashMap::new(),
            policy: settings.policy,
        };

        for record in records {
            let path = root.join(&record.key);
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    index.clock = index.clock.max(record.last_access);
                    index.insert(CacheEntry {
                        key: record.key,
                        path,
                        size_bytes: meta.len(),
                        last_access: record.last_access,
                    });
                }
                _ => engine_debug!("dropping cache entry {} with missing file", record.key),
            }
        }

        for dir_entry in fs::read_dir(&root)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if name == INDEX_FILE || index.entries.contains_key(&name) {
                continue;
            }
            let path = dir_entry.path();
            let meta = dir_entry.metadata()?;
            if meta.is_file() && is_cache_key(&name) {
                index.insert(CacheEntry {
                    key: name,
                    path,
                    size_bytes: meta.len(),
                    last_access: 0,
                });
            } else if meta.is_file() {
                engine_debug!("removing stray cache file {:?}", path);
                let _ = fs::remove_file(&path);
            }
        }

        let store = Self {
            writer: AtomicFileWriter::new(root.clone()),
            root,
            inner: Mutex::new(index),
        };
        {
            let mut index = store.lock();
            let report = store.evict_locked(&mut index);
            if !report.evicted.is_empty() {
                engine_info!("cache trimmed on open, evicted {}", report.evicted.len());
            }
            store.save_locked(&index)?;
            engine_info!(
                "cache opened at {:?}: {} entries, {} bytes",
                store.root,
                index.entries.len(),
                index.total_bytes
            );
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a cached file, marking it as most recently used.
    pub fn try_get(&self, key: &str) -> Option<PathBuf> {
        let mut index = self.lock();
        let path = index.entries.get(key)?.path.clone();
        if !path.is_file() {
            engine_warn!("cache file for {} vanished, dropping entry", key);
            index.remove(key);
            return None;
        }
        let stamp = index.touch();
        if let Some(entry) = index.entries.get_mut(key) {
            entry.last_access = stamp;
        }
        Some(path)
    }

    /// Insert a copy of `source` under `key`, then evict if over the ceiling.
    pub fn put_file(&self, key: &str, source: &Path) -> Result<PathBuf, CacheError> {
        let path = self.writer.copy_from(key, source)?;
        self.register(key, path)
    }

    pub fn put_bytes(&self, key: &str, content: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.writer.write(key, content)?;
        self.register(key, path)
    }

    fn register(&self, key: &str, path: PathBuf) -> Result<PathBuf, CacheError> {
        let size_bytes = fs::metadata(&path)?.len();
        let mut index = self.lock();
        let last_access = index.touch();
        index.insert(CacheEntry {
            key: key.to_string(),
            path: path.clone(),
            size_bytes,
            last_access,
        });
        engine_debug!("cached {} ({} bytes)", key, size_bytes);
        if index.policy.needs_eviction(index.total_bytes) {
            self.evict_locked(&mut index);
        }
        self.save_locked(&index)?;
        Ok(path)
    }

    /// Remove one entry. Pinned entries are refused.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut index = self.lock();
        if index.is_pinned(key) {
            return Err(CacheError::Pinned(key.to_string()));
        }
        let Some(entry) = index.remove(key) else {
            return Ok(false);
        };
        remove_file_if_exists(&entry.path)?;
        self.save_locked(&index)?;
        Ok(true)
    }

    pub fn total_size(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Entries ordered from least to most recently used.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let index = self.lock();
        let mut entries: Vec<_> = index.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.lock().policy.max_size_bytes()
    }

    /// Change the ceiling and evict down to it right away.
    pub fn set_policy(&self, policy: EvictionPolicy) -> Result<EvictionReport, CacheError> {
        let mut index = self.lock();
        index.policy = policy;
        let report = self.evict_locked(&mut index);
        self.save_locked(&index)?;
        Ok(report)
    }

    /// Manual "clear extra cache" signal: evict down to the ceiling.
    pub fn clear_extra(&self) -> Result<EvictionReport, CacheError> {
        let mut index = self.lock();
        let report = self.evict_locked(&mut index);
        self.save_locked(&index)?;
        Ok(report)
    }

    /// Remove every unpinned entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut index = self.lock();
        let keys: Vec<String> = index
            .entries
            .keys()
            .filter(|key| !index.is_pinned(key))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(entry) = index.remove(key) {
                remove_file_if_exists(&entry.path)?;
            }
        }
        self.save_locked(&index)?;
        engine_info!("cache cleared, removed {} entries", keys.len());
        Ok(keys.len())
    }

    /// Shield `key` from eviction and removal while the returned guard lives.
    pub fn pin(&self, key: &str) -> CachePin<'_> {
        let mut index = self.lock();
        *index.pins.entry(key.to_string()).or_insert(0) += 1;
        CachePin {
            store: self,
            key: key.to_string(),
        }
    }

    fn unpin(&self, key: &str) {
        let mut index = self.lock();
        if let Some(count) = index.pins.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                index.pins.remove(key);
            }
        }
    }

    fn evict_locked(&self, index: &mut CacheIndex) -> EvictionReport {
        let selection = index.policy.select_victims(&index.views());
        let mut report = EvictionReport {
            oversized_kept: selection.oversized_kept,
            ..EvictionReport::default()
        };
        for key in selection.victims {
            if let Some(entry) = index.remove(&key) {
                if let Err(err) = remove_file_if_exists(&entry.path) {
                    engine_warn!("failed to delete evicted cache file {:?}: {}", entry.path, err);
                }
                report.freed_bytes += entry.size_bytes;
                report.evicted.push(key);
            }
        }
        if let Some(key) = &report.oversized_kept {
            engine_warn!(
                "cache entry {} alone exceeds the {} byte ceiling, keeping it",
                key,
                index.policy.max_size_bytes()
            );
        }
        if !report.evicted.is_empty() {
            engine_info!(
                "evicted {} cache entries, freed {} bytes",
                report.evicted.len(),
                report.freed_bytes
            );
        }
        report.remaining_bytes = index.total_bytes;
        report
    }

    fn save_locked(&self, index: &CacheIndex) -> Result<(), CacheError> {
        let mut records: Vec<IndexRecord> = index
            .entries
            .values()
            .map(|e| IndexRecord {
                key: e.key.clone(),
                size_bytes: e.size_bytes,
                last_access: e.last_access,
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        let content = serde_json::to_vec_pretty(&records)?;
        self.writer.write(INDEX_FILE, &content)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheIndex> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps one cache entry out of eviction until dropped.
#[derive(Debug)]
pub struct CachePin<'a> {
    store: &'a CacheStore,
    key: String,
}

impl Drop for CachePin<'_> {
    fn drop(&mut self) {
        self.store.unpin(&self.key);
    }
}

fn load_index(root: &Path) -> Vec<IndexRecord> {
    let path = root.join(INDEX_FILE);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            engine_warn!("Failed to read cache index {:?}: {}", path, err);
            return Vec::new();
        }
    };
    match serde_json::from_slice(&content) {
        Ok(records) => records,
        Err(err) => {
            engine_warn!("Failed to parse cache index {:?}: {}", path, err);
            Vec::new()
        }
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{cache_key, is_cache_key};

    #[test]
    fn keys_are_stable_hex_digests() {
        let key = cache_key("https://example.com/a.png");
        assert_eq!(key, cache_key("https://example.com/a.png"));
        assert_ne!(key, cache_key("https://example.com/b.png"));
        assert!(is_cache_key(&key));
        assert!(!is_cache_key("index.json"));
    }
}
