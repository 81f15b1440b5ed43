use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Suffix marker for in-flight writes. Never matches a normalized key
/// because `.` is outside the key alphabet.
const TEMP_MARKER: &str = ".tmp.";

/// Errors raised by cache reads and writes.
///
/// Callers treat these as non-fatal: a failed read is a cache miss and a
/// failed write only loses the cached copy.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A cached payload together with the time since it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFeed {
    pub bytes: Vec<u8>,
    pub age: Duration,
}

/// URL-keyed byte cache rooted at a single directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

/// Normalizes a URL into a cache file name.
///
/// Every run of characters outside `[A-Za-z0-9-]` becomes a single `-`.
/// The mapping is lossy: `https://a.b/c` and `https://a-b/c` share a key.
pub fn cache_key(url: &str) -> String {
    let mut key = String::with_capacity(url.len());
    let mut in_run = false;
    for c in url.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            key.push(c);
            in_run = false;
        } else if !in_run {
            key.push('-');
            in_run = true;
        }
    }
    key
}

impl CacheStore {
    /// Opens (and creates if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;
        tracing::debug!(root = %root.display(), "Opened feed cache");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache file for `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(cache_key(url))
    }

    /// Looks up the cached bytes for `url`.
    ///
    /// Returns `Ok(None)` when nothing has been cached yet. A modification
    /// time in the future (clock skew) counts as age zero.
    pub fn get(&self, url: &str) -> Result<Option<CachedFeed>, CacheError> {
        let path = self.path_for(url);

        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            // Pruned between metadata and read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        Ok(Some(CachedFeed { bytes, age }))
    }

    /// Stores `bytes` as the cached value for `url`, replacing any previous value.
    ///
    /// Writes go to a uniquely named temporary file that is synced and then
    /// renamed over the key file, so a concurrent `get` sees either the old
    /// or the new payload, never a partial one. The temp name is made unique
    /// by the current time in nanoseconds plus the process id.
    pub fn put(&self, url: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(url);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let file_name = format!(
            "{}{}{:016x}.{}",
            cache_key(url),
            TEMP_MARKER,
            nanos,
            std::process::id()
        );
        let temp_path = self.root.join(file_name);

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| CacheError::io(&temp_path, e))?;

        let written = file
            .write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| CacheError::io(&temp_path, e));
        drop(file);

        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        #[cfg(windows)]
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }

        std::fs::rename(&temp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            CacheError::io(&path, e)
        })?;

        tracing::trace!(url = %url, bytes = bytes.len(), "Cached feed payload");
        Ok(())
    }

    /// Deletes cache files (and abandoned temp files) older than `max_age`.
    ///
    /// Returns the number of files removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize, CacheError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }

        tracing::debug!(root = %self.root.display(), removed = removed, "Pruned feed cache");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn test_store(name: &str) -> CacheStore {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "hybridfeed_cache_{}_{}_{}",
            name,
            std::process::id(),
            nanos
        ));
        CacheStore::new(dir).unwrap()
    }

    fn backdate(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_cache_key_collapses_runs() {
        assert_eq!(
            cache_key("https://example.com/feed.xml"),
            "https-example-com-feed-xml"
        );
        assert_eq!(cache_key("a///b"), "a-b");
        assert_eq!(cache_key("keep-dashes-123"), "keep-dashes-123");
    }

    #[test]
    fn test_cache_key_keeps_letter_case() {
        assert_eq!(cache_key("HTTP://Example.COM"), "HTTP-Example-COM");
    }

    #[test]
    fn test_cache_key_is_lossy() {
        // Known limitation: distinct URLs may share a key
        assert_eq!(cache_key("https://a.b/c"), cache_key("https://a-b/c"));
    }

    #[test]
    fn test_new_creates_directory() {
        let store = test_store("create");
        assert!(store.root().is_dir());
        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = test_store("missing");
        assert!(store.get("https://example.com/rss").unwrap().is_none());
        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_put_then_get() {
        let store = test_store("put_get");
        store.put("https://example.com/rss", b"<rss/>").unwrap();

        let cached = store.get("https://example.com/rss").unwrap().unwrap();
        assert_eq!(cached.bytes, b"<rss/>");
        assert!(cached.age < Duration::from_secs(60));

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_put_overwrites_previous_value() {
        let store = test_store("overwrite");
        store.put("https://example.com/rss", b"old").unwrap();
        store.put("https://example.com/rss", b"new").unwrap();

        let cached = store.get("https://example.com/rss").unwrap().unwrap();
        assert_eq!(cached.bytes, b"new");

        // Only the key file remains, no temp files left behind
        let files: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(files.len(), 1);

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_back_to_back_puts_leave_only_key_file() {
        let store = test_store("back_to_back");
        let url = "https://example.com/rss";
        for i in 0..50u32 {
            store.put(url, format!("v{}", i).as_bytes()).unwrap();
        }

        assert_eq!(store.get(url).unwrap().unwrap().bytes, b"v49");

        let names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![cache_key(url)]);

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_put_resets_age() {
        let store = test_store("age_reset");
        let url = "https://example.com/rss";
        store.put(url, b"v1").unwrap();
        backdate(&store.path_for(url), Duration::from_secs(7200));
        assert!(store.get(url).unwrap().unwrap().age >= Duration::from_secs(7200));

        store.put(url, b"v2").unwrap();
        assert!(store.get(url).unwrap().unwrap().age < Duration::from_secs(60));

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_age_reflects_mtime() {
        let store = test_store("age");
        let url = "https://example.com/atom";
        store.put(url, b"<feed/>").unwrap();
        backdate(&store.path_for(url), Duration::from_secs(5000));

        let cached = store.get(url).unwrap().unwrap();
        assert!(cached.age >= Duration::from_secs(5000));
        assert!(cached.age < Duration::from_secs(5100));

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_future_mtime_is_age_zero() {
        let store = test_store("future");
        let url = "https://example.com/skew";
        store.put(url, b"x").unwrap();
        let file = File::options()
            .write(true)
            .open(store.path_for(url))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();

        assert_eq!(store.get(url).unwrap().unwrap().age, Duration::ZERO);

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_put_fails_when_root_removed() {
        let store = test_store("gone");
        std::fs::remove_dir_all(store.root()).unwrap();

        let result = store.put("https://example.com/rss", b"data");
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }

    #[test]
    fn test_prune_removes_only_stale_files() {
        let store = test_store("prune");
        store.put("https://fresh.example.com/rss", b"fresh").unwrap();
        store.put("https://stale.example.com/rss", b"stale").unwrap();
        backdate(
            &store.path_for("https://stale.example.com/rss"),
            Duration::from_secs(10_000),
        );

        let removed = store.prune(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("https://fresh.example.com/rss").unwrap().is_some());
        assert!(store.get("https://stale.example.com/rss").unwrap().is_none());

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn test_prune_empty_cache() {
        let store = test_store("prune_empty");
        assert_eq!(store.prune(Duration::ZERO).unwrap(), 0);
        std::fs::remove_dir_all(store.root()).ok();
    }
}
