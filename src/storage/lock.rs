//! Per-path reader/writer lock with section accounting.

use crate::core::Result;
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// Every store for the same canonical file shares one lock
lazy_static! {
    static ref LOCK_TABLE: Mutex<HashMap<PathBuf, Arc<StoreLock>>> = Mutex::new(HashMap::new());
}

/// Returns the process-wide lock for `path`, creating it on first use.
pub fn lock_for(path: &Path) -> Result<Arc<StoreLock>> {
    let key = normalize_path(path);
    let mut table = LOCK_TABLE.lock()?;
    let lock = table
        .entry(key.clone())
        .or_insert_with(|| Arc::new(StoreLock::new(key)));
    Ok(Arc::clone(lock))
}

/// Absolute, lexically cleaned form of `path`. The parent directory is
/// canonicalized when it exists so symlinked directories map to one key.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    match (cleaned.parent(), cleaned.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => cleaned,
        },
        _ => cleaned,
    }
}

/// Snapshot of a lock's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    pub active_readers: usize,
    pub active_writers: usize,
    pub read_sections: u64,
    pub write_sections: u64,
    pub peak_readers: usize,
    /// Sections that observed another conflicting section while entering.
    pub violations: u64,
}

#[derive(Default)]
struct SectionCounters {
    active_readers: AtomicUsize,
    active_writers: AtomicUsize,
    read_sections: AtomicU64,
    write_sections: AtomicU64,
    peak_readers: AtomicUsize,
    violations: AtomicU64,
}

pub struct StoreLock {
    path: PathBuf,
    inner: RwLock<()>,
    counters: SectionCounters,
}

impl StoreLock {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: RwLock::new(()),
            counters: SectionCounters::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> ReadSection<'_> {
        let guard = self.inner.read().await;
        let counters = &self.counters;
        let readers = counters.active_readers.fetch_add(1, Ordering::SeqCst) + 1;
        if counters.active_writers.load(Ordering::SeqCst) > 0 {
            counters.violations.fetch_add(1, Ordering::SeqCst);
        }
        counters.peak_readers.fetch_max(readers, Ordering::SeqCst);
        counters.read_sections.fetch_add(1, Ordering::SeqCst);
        ReadSection {
            lock: self,
            _guard: guard,
        }
    }

    pub async fn write(&self) -> WriteSection<'_> {
        let guard = self.inner.write().await;
        let counters = &self.counters;
        let writers = counters.active_writers.fetch_add(1, Ordering::SeqCst) + 1;
        if writers > 1 || counters.active_readers.load(Ordering::SeqCst) > 0 {
            counters.violations.fetch_add(1, Ordering::SeqCst);
        }
        counters.write_sections.fetch_add(1, Ordering::SeqCst);
        WriteSection {
            lock: self,
            _guard: guard,
        }
    }

    pub fn stats(&self) -> LockStats {
        let counters = &self.counters;
        LockStats {
            active_readers: counters.active_readers.load(Ordering::SeqCst),
            active_writers: counters.active_writers.load(Ordering::SeqCst),
            read_sections: counters.read_sections.load(Ordering::SeqCst),
            write_sections: counters.write_sections.load(Ordering::SeqCst),
            peak_readers: counters.peak_readers.load(Ordering::SeqCst),
            violations: counters.violations.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("path", &self.path)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Shared section; the counter drops before the underlying guard releases.
pub struct ReadSection<'a> {
    lock: &'a StoreLock,
    _guard: RwLockReadGuard<'a, ()>,
}

impl Drop for ReadSection<'_> {
    fn drop(&mut self) {
        self.lock.counters.active_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WriteSection<'a> {
    lock: &'a StoreLock,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        self.lock.counters.active_writers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_same_file_shares_lock() {
        let dir = tempdir().unwrap();
        let direct = dir.path().join("catalog.json");
        let dotted = dir.path().join(".").join("sub").join("..").join("catalog.json");

        let a = lock_for(&direct).unwrap();
        let b = lock_for(&dotted).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = lock_for(&dir.path().join("other.json")).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_sections_are_counted() {
        let dir = tempdir().unwrap();
        let lock = lock_for(&dir.path().join("counted.json")).unwrap();

        {
            let _r1 = lock.read().await;
            let _r2 = lock.read().await;
            assert_eq!(lock.stats().active_readers, 2);
        }
        {
            let _w = lock.write().await;
            assert_eq!(lock.stats().active_writers, 1);
        }

        let stats = lock.stats();
        assert_eq!(stats.read_sections, 2);
        assert_eq!(stats.write_sections, 1);
        assert_eq!(stats.peak_readers, 2);
        assert_eq!(stats.active_readers, 0);
        assert_eq!(stats.active_writers, 0);
        assert_eq!(stats.violations, 0);
    }
}
