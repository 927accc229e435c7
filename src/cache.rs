//! Two-level cache for scan results.
//!
//! Entries live in an in-memory map and are mirrored to JSON files in the
//! cache directory, so a fresh result survives a process restart. Every
//! entry records when it was written; lookups older than the TTL report
//! [`CacheLookup::Expired`] and the entry is dropped.
//!
//! Cache files are named `depscan-<key>.json`. [`ScanCache::clear`] only
//! removes files following that convention, so the directory may be shared.
//!
//! # Example
//!
//! ```no_run
//! use depscan::cache::{CacheLookup, ScanCache};
//! use std::time::Duration;
//!
//! let cache = ScanCache::new("/tmp/depscan");
//! cache.set("npm-audit", &vec!["lodash".to_string()]).unwrap();
//!
//! match cache.get::<Vec<String>>("npm-audit", Duration::from_secs(60)) {
//!     CacheLookup::Hit(value) => println!("cached: {:?}", value),
//!     CacheLookup::Miss | CacheLookup::Expired => println!("not cached"),
//! }
//! ```

use anyhow::Result;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

const FILE_PREFIX: &str = "depscan-";
const FILE_EXTENSION: &str = "json";

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    value: serde_json::Value,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().timestamp_millis().saturating_sub(self.timestamp);
        age < 0 || age as u128 > ttl.as_millis()
    }
}

pub struct ScanCache {
    dir: RwLock<PathBuf>,
    memory: Mutex<HashMap<String, CacheEntry>>,
}

impl ScanCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: RwLock::new(dir.into()),
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.read().map(|d| d.clone()).unwrap_or_default()
    }

    /// Points the file layer at another directory. In-memory entries are dropped.
    pub fn set_dir(&self, dir: impl Into<PathBuf>) {
        if let Ok(mut current) = self.dir.write() {
            *current = dir.into();
        }
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
    }

    /// Converts a cache key to a safe filename.
    fn cache_path(dir: &Path, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        dir.join(format!("{}{}.{}", FILE_PREFIX, safe_key, FILE_EXTENSION))
    }

    fn is_cache_file(path: &Path) -> bool {
        let has_prefix = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(FILE_PREFIX))
            .unwrap_or(false);
        has_prefix
            && path
                .extension()
                .map(|e| e == FILE_EXTENSION)
                .unwrap_or(false)
    }

    /// Looks `key` up, memory first, then disk.
    pub fn get<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> CacheLookup<T> {
        let path = Self::cache_path(&self.dir(), key);

        let in_memory = self
            .memory
            .lock()
            .ok()
            .and_then(|memory| memory.get(key).cloned());

        let entry = match in_memory {
            Some(entry) => entry,
            None => match Self::read_file(&path) {
                Some(entry) => entry,
                None => return CacheLookup::Miss,
            },
        };

        if entry.is_expired(ttl) {
            debug!(key, "cache entry expired");
            self.evict(key, &path);
            return CacheLookup::Expired;
        }

        match serde_json::from_value::<T>(entry.value.clone()) {
            Ok(value) => {
                if let Ok(mut memory) = self.memory.lock() {
                    memory.insert(key.to_string(), entry);
                }
                CacheLookup::Hit(value)
            }
            Err(e) => {
                debug!(key, error = %e, "discarding unreadable cache entry");
                self.evict(key, &path);
                CacheLookup::Miss
            }
        }
    }

    fn read_file(path: &Path) -> Option<CacheEntry> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn evict(&self, key: &str, path: &Path) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(key);
        }
        let _ = fs::remove_file(path);
    }

    /// Stores `value` under `key` in memory and on disk.
    ///
    /// The in-memory entry is kept even when the file write fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or the file cannot
    /// be written.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let entry = CacheEntry {
            timestamp: Utc::now().timestamp_millis(),
            value: serde_json::to_value(value)?,
        };

        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(key.to_string(), entry.clone());
        }

        let dir = self.dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        fs::write(Self::cache_path(&dir, key), serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// Empties the memory map and deletes this cache's files.
    ///
    /// Returns the number of files removed.
    pub fn clear(&self) -> Result<usize> {
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }

        let dir = self.dir();
        let mut removed = 0;
        if dir.exists() {
            for entry in fs::read_dir(&dir)?.flatten() {
                let path = entry.path();
                if Self::is_cache_file(&path) && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_set_then_get_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScanCache::new(dir.path());

        cache.set("npm-audit", &vec![1, 2, 3]).unwrap();
        assert_eq!(cache.get::<Vec<i32>>("npm-audit", TTL), CacheLookup::Hit(vec![1, 2, 3]));
        assert_eq!(cache.get::<Vec<i32>>("npm-outdated", TTL), CacheLookup::Miss);
    }

    #[test]
    fn test_file_layer_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        ScanCache::new(dir.path())
            .set("full-scan", &"result".to_string())
            .unwrap();

        let fresh = ScanCache::new(dir.path());
        assert_eq!(
            fresh.get::<String>("full-scan", TTL),
            CacheLookup::Hit("result".to_string())
        );
    }

    #[test]
    fn test_expired_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScanCache::new(dir.path());
        cache.set("full-scan", &1u8).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            cache.get::<u8>("full-scan", Duration::from_millis(1)),
            CacheLookup::Expired
        );
        assert_eq!(cache.get::<u8>("full-scan", TTL), CacheLookup::Miss);
        assert!(!dir.path().join("depscan-full-scan.json").exists());
    }

    #[test]
    fn test_clear_only_removes_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScanCache::new(dir.path());
        cache.set("full-scan", &1u8).unwrap();
        cache.set("npm-audit", &2u8).unwrap();
        fs::write(dir.path().join("unrelated.json"), "{}").unwrap();
        fs::write(dir.path().join("depscan-notes.txt"), "keep").unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.get::<u8>("full-scan", TTL), CacheLookup::Miss);
        assert!(dir.path().join("unrelated.json").exists());
        assert!(dir.path().join("depscan-notes.txt").exists());
    }

    #[test]
    fn test_corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("depscan-full-scan.json"), "not json").unwrap();

        let cache = ScanCache::new(dir.path());
        assert_eq!(cache.get::<u8>("full-scan", TTL), CacheLookup::Miss);
    }

    #[test]
    fn test_keys_are_sanitized() {
        let path = ScanCache::cache_path(Path::new("/c"), "a/b:c");
        assert_eq!(path, PathBuf::from("/c/depscan-a_b_c.json"));
    }
}
