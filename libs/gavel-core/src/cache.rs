use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::Result;

/// Capture-File Pool
///
/// **Core Responsibility:**
/// Hand out scratch files for process stdout/stderr capture and spilled
/// test-case data, and take them back for reuse once the run has read the
/// results. Long judging sessions would otherwise accumulate thousands of
/// small temp files.
///
/// Files are created under one directory with UUID names. `acquire`
/// truncates before handing out, so stale content from a previous run can
/// never leak into a new capture.
#[derive(Debug, Clone)]
pub struct CachePool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    dir: PathBuf,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<PathBuf>,
    used: HashSet<PathBuf>,
}

impl CachePool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CachePool {
            inner: Arc::new(PoolInner {
                dir: dir.into(),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Take a scratch file out of the pool, creating a fresh one when no
    /// free file is available. The returned file exists and is empty.
    pub async fn acquire(&self) -> Result<PathBuf> {
        let reused = {
            let mut state = self.lock();
            state.free.pop()
        };
        let path = match reused {
            Some(path) => path,
            None => self.inner.dir.join(format!("{}.buf", Uuid::new_v4())),
        };

        tokio::fs::create_dir_all(&self.inner.dir).await?;
        // Truncates on reuse.
        tokio::fs::File::create(&path).await?;

        self.lock().used.insert(path.clone());
        Ok(path)
    }

    /// Return a file to the pool for reuse. Unknown paths are ignored so a
    /// double release stays harmless.
    pub fn release(&self, path: &Path) {
        let mut state = self.lock();
        if state.used.remove(path) {
            state.free.push(path.to_path_buf());
        }
    }

    /// Forget a file without freeing it: the path now belongs to the caller
    /// (a persisted test case keeps pointing at it) and must never be
    /// truncated by a later `acquire`.
    pub fn detach(&self, path: &Path) {
        self.lock().used.remove(path);
    }

    /// Delete all files currently sitting in the free list.
    pub async fn clear(&self) -> Result<()> {
        let free = {
            let mut state = self.lock();
            std::mem::take(&mut state.free)
        };
        for path in free {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove pooled file");
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // Mutex poisoning only happens if a holder panicked; the state is a
        // plain path list, safe to keep using.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_reuses_released_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = CachePool::new(dir.path());

        let first = pool.acquire().await.expect("acquire");
        pool.release(&first);
        let second = pool.acquire().await.expect("acquire again");

        assert_eq!(first, second, "released file should be reused");
    }

    #[tokio::test]
    async fn reused_files_are_truncated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = CachePool::new(dir.path());

        let path = pool.acquire().await.expect("acquire");
        tokio::fs::write(&path, "stale output").await.expect("write");
        pool.release(&path);

        let again = pool.acquire().await.expect("reacquire");
        let content = tokio::fs::read_to_string(&again).await.expect("read");
        assert!(content.is_empty(), "reacquired file must be empty");
    }

    #[tokio::test]
    async fn detached_files_are_not_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = CachePool::new(dir.path());

        let kept = pool.acquire().await.expect("acquire");
        tokio::fs::write(&kept, "persisted test case data").await.expect("write");
        pool.detach(&kept);
        pool.release(&kept); // release after detach is a no-op

        let fresh = pool.acquire().await.expect("acquire");
        assert_ne!(kept, fresh);
        let content = tokio::fs::read_to_string(&kept).await.expect("read");
        assert_eq!(content, "persisted test case data");
    }
}
