//! Time-bounded cache of directory listings.
//!
//! Scanning a network share for a few thousand files takes seconds, and the
//! display layer asks for the same listings repeatedly while a user prepares a
//! run. [`FileListCache`] remembers each `(directory, extensions)` listing for
//! a freshness window (five minutes by default) and serves it from memory
//! until it expires.
//!
//! A directory that does not exist, or that cannot be read, lists as empty.
//! Denied access is logged; absence is not, since it is the normal state of a
//! project that has not been set up yet.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::layout::has_extension;

type ListingKey = (PathBuf, Vec<String>);

#[derive(Debug, Clone)]
struct Listing {
    files: Vec<PathBuf>,
    listed_at: Instant,
}

/// Thread-safe TTL cache of flat directory listings.
#[derive(Debug)]
pub struct FileListCache {
    entries: DashMap<ListingKey, Listing>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FileListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Files directly inside `dir` whose extension is in `extensions`
    /// (case-insensitive), sorted by path.
    pub fn list_files(&self, dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
        let key = listing_key(dir, extensions);

        if let Some(entry) = self.entries.get(&key) {
            if entry.listed_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.files.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let files = scan_dir(dir, extensions);
        debug!("Listed {} file(s) in {}", files.len(), dir.display());
        self.entries.insert(
            key,
            Listing {
                files: files.clone(),
                listed_at: Instant::now(),
            },
        );
        files
    }

    /// Drop every cached listing of `dir`.
    pub fn invalidate(&self, dir: &Path) {
        self.entries.retain(|(cached_dir, _), _| cached_dir != dir);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FileListCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

fn listing_key(dir: &Path, extensions: &[&str]) -> ListingKey {
    let mut exts: Vec<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
    exts.sort();
    exts.dedup();
    (dir.to_path_buf(), exts)
}

/// Uncached flat scan. Never fails: unreadable directories list as empty.
pub fn scan_dir(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!("Permission denied listing {}", dir.display());
            return Vec::new();
        }
        Err(e) => {
            warn!("Cannot list {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| has_extension(path, extensions))
        .collect();
    files.sort();
    files
}
