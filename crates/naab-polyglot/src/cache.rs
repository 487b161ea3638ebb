//! Content-addressed cache of compiled inline-code artifacts.
//!
//! Layout: `<root>/<language>/<hash>.bin` plus `<hash>.src`, with the
//! metadata index persisted as JSON at `<root>/index`. The key is a
//! SHA-256 over the language tag and the normalized source bytes, so
//! repeated executions of identical inline code reuse the compiled
//! binary across runs.

use naab_core::{ErrorKind, NaabError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default cap on the cache's total size.
pub const DEFAULT_CACHE_CAP_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub language: String,
    pub binary_path: PathBuf,
    pub source_path: PathBuf,
    pub created_at: u64,
    pub last_used_at: u64,
    pub use_count: u64,
    pub byte_size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: Vec<CacheEntry>,
}

/// The compiled-artifact cache. All mutating operations run under a
/// process-level lock; the index is rewritten atomically (write +
/// rename) so concurrent stores cannot corrupt it.
pub struct ArtifactCache {
    root: PathBuf,
    index: Mutex<CacheIndex>,
}

impl ArtifactCache {
    /// Open (or create) a cache rooted at `root`.
    pub fn new(root: PathBuf) -> Result<Self, NaabError> {
        std::fs::create_dir_all(&root)?;
        let index_path = root.join("index");
        let index = if index_path.exists() {
            let data = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&data).unwrap_or_else(|e| {
                log::warn!("artifact cache index unreadable, starting fresh: {}", e);
                CacheIndex::default()
            })
        } else {
            CacheIndex::default()
        };
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    /// The user-scope default root: `<cache dir>/naab`.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("naab")
    }

    /// Deterministic content hash over `(language, normalized source)`.
    pub fn content_hash(language: &str, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(language.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize_source(code).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a compiled binary; a hit bumps usage metadata.
    pub fn lookup(&self, language: &str, code: &str) -> Option<PathBuf> {
        let hash = Self::content_hash(language, code);
        let mut index = self.index.lock();
        let entry = index
            .entries
            .iter_mut()
            .find(|e| e.content_hash == hash && e.language == language)?;
        if !entry.binary_path.exists() {
            // Stale entry: file vanished under us
            let path = entry.binary_path.clone();
            index.entries.retain(|e| e.binary_path != path);
            let _ = self.persist(&index);
            return None;
        }
        entry.last_used_at = now();
        entry.use_count += 1;
        let path = entry.binary_path.clone();
        let _ = self.persist(&index);
        Some(path)
    }

    /// Copy a freshly compiled binary (and its source) into the cache
    /// layout and record it. Returns the cached binary path.
    pub fn store(
        &self,
        language: &str,
        code: &str,
        binary: &Path,
    ) -> Result<PathBuf, NaabError> {
        let hash = Self::content_hash(language, code);
        let dir = self.root.join(language);
        std::fs::create_dir_all(&dir)?;
        let binary_path = dir.join(format!("{}.bin", hash));
        let source_path = dir.join(format!("{}.src", hash));
        std::fs::copy(binary, &binary_path)?;
        std::fs::write(&source_path, code)?;
        let byte_size = std::fs::metadata(&binary_path)?.len();

        let mut index = self.index.lock();
        index.entries.retain(|e| e.content_hash != hash);
        index.entries.push(CacheEntry {
            content_hash: hash,
            language: language.to_string(),
            binary_path: binary_path.clone(),
            source_path,
            created_at: now(),
            last_used_at: now(),
            use_count: 1,
            byte_size,
        });
        self.persist(&index)?;
        Ok(binary_path)
    }

    /// Evict least-recently-used entries until the total size fits
    /// under `max_total_bytes`. Returns how many entries were evicted.
    pub fn maintain(&self, max_total_bytes: u64) -> Result<usize, NaabError> {
        let mut index = self.index.lock();
        let mut total: u64 = index.entries.iter().map(|e| e.byte_size).sum();
        if total <= max_total_bytes {
            return Ok(0);
        }
        index.entries.sort_by_key(|e| e.last_used_at);
        let mut evicted = 0;
        while total > max_total_bytes && !index.entries.is_empty() {
            let entry = index.entries.remove(0);
            let _ = std::fs::remove_file(&entry.binary_path);
            let _ = std::fs::remove_file(&entry.source_path);
            total -= entry.byte_size;
            evicted += 1;
        }
        self.persist(&index)?;
        log::info!("artifact cache evicted {} entries", evicted);
        Ok(evicted)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, index: &CacheIndex) -> Result<(), NaabError> {
        let data = serde_json::to_string_pretty(index)
            .map_err(|e| NaabError::new(ErrorKind::Io, e.to_string()))?;
        let tmp = self.root.join("index.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, self.root.join("index"))?;
        Ok(())
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn normalize_source(code: &str) -> String {
    // Strip trailing whitespace per line so formatting-only edits
    // still hit the cache
    let mut out: String = code
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, ArtifactCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    fn fake_binary(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn test_hash_is_stable_and_language_tagged() {
        let a = ArtifactCache::content_hash("c", "int f() { return 1; }");
        let b = ArtifactCache::content_hash("c", "int f() { return 1; }");
        let c = ArtifactCache::content_hash("rust", "int f() { return 1; }");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_ignores_trailing_whitespace() {
        let a = ArtifactCache::content_hash("c", "int x;   \n");
        let b = ArtifactCache::content_hash("c", "int x;\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_store_then_lookup() {
        let (dir, cache) = cache();
        let bin = fake_binary(dir.path(), "a.so", 64);
        let stored = cache.store("c", "code-a", &bin).unwrap();
        let found = cache.lookup("c", "code-a").unwrap();
        assert_eq!(stored, found);
        assert!(found.exists());
        assert!(cache.lookup("c", "code-b").is_none());
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let bin = fake_binary(dir.path(), "a.so", 16);
        {
            let cache = ArtifactCache::new(root.clone()).unwrap();
            cache.store("c", "persisted", &bin).unwrap();
        }
        let cache = ArtifactCache::new(root).unwrap();
        assert!(cache.lookup("c", "persisted").is_some());
    }

    #[test]
    fn test_maintain_evicts_lru() {
        let (dir, cache) = cache();
        let bin = fake_binary(dir.path(), "a.so", 100);
        cache.store("c", "old", &bin).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.store("c", "new", &bin).unwrap();

        // Cap below total size: the older entry goes first
        let evicted = cache.maintain(150).unwrap();
        assert_eq!(evicted, 1);
        assert!(cache.lookup("c", "old").is_none());
        assert!(cache.lookup("c", "new").is_some());
    }

    #[test]
    fn test_stale_entry_cleared_when_binary_missing() {
        let (dir, cache) = cache();
        let bin = fake_binary(dir.path(), "a.so", 16);
        let stored = cache.store("c", "gone", &bin).unwrap();
        std::fs::remove_file(stored).unwrap();
        assert!(cache.lookup("c", "gone").is_none());
        assert!(cache.is_empty());
    }
}
