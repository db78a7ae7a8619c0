use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Cancellation - Single-Flight Run Coordination
///
/// **Core Responsibility:**
/// One problem owns one [`RunScope`]; at most one run is active inside it.
/// Starting a new run cancels the previous one and waits for it to wind
/// down before proceeding, so two runs never race writes to the same
/// results.
///
/// Cancellation is cooperative: a [`CancelToken`] is threaded through every
/// judging call and checked at loop tops and before subprocess launches.
/// The reason tag distinguishes "abort everything" from "skip just the
/// current case"; the suite loop decides what each means.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Stop the whole run.
    Abort,
    /// Stop the case currently being judged, keep the run going.
    SkipCurrent,
}

/// Sending half of one run's cancellation channel.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<Option<CancelReason>>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        CancelSource { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken { rx: self.tx.subscribe() }
    }

    /// First reason wins; a later cancel with a different reason is ignored.
    pub fn cancel(&self, reason: CancelReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half, cheap to clone and pass down the call tree.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancelToken {
    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the run is cancelled. A dropped source counts as an
    /// abort so nothing waits forever on a dead scope.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        loop {
            {
                if let Some(reason) = *rx.borrow() {
                    return reason;
                }
            }
            if rx.changed().await.is_err() {
                return CancelReason::Abort;
            }
        }
    }
}

#[derive(Debug)]
struct ScopeInner {
    /// Serializes acquirers so exactly one run claims the scope at a time.
    claim: tokio::sync::Mutex<()>,
    active: Mutex<Option<CancelSource>>,
    busy: watch::Sender<bool>,
}

/// Per-problem single-flight scope. See the module docs.
#[derive(Debug, Clone)]
pub struct RunScope {
    inner: Arc<ScopeInner>,
}

/// Held by the active run; dropping it marks the scope idle and wakes
/// whoever is waiting to start the next run.
#[derive(Debug)]
pub struct RunGuard {
    inner: Arc<ScopeInner>,
}

impl RunScope {
    pub fn new() -> Self {
        let (busy, _rx) = watch::channel(false);
        RunScope {
            inner: Arc::new(ScopeInner {
                claim: tokio::sync::Mutex::new(()),
                active: Mutex::new(None),
                busy,
            }),
        }
    }

    /// Claim the scope for a new run: cancel whatever is active, wait until
    /// it has fully wound down, then install a fresh cancellation channel.
    pub async fn acquire(&self) -> (RunGuard, CancelToken) {
        let _claim = self.inner.claim.lock().await;

        if let Some(source) = lock_active(&self.inner).as_ref() {
            source.cancel(CancelReason::Abort);
        }
        self.wait_idle().await;

        let source = CancelSource::new();
        let token = source.token();
        *lock_active(&self.inner) = Some(source);
        let _ = self.inner.busy.send(true);

        (RunGuard { inner: Arc::clone(&self.inner) }, token)
    }

    /// Fire a cancellation at the active run, if any. Does not wait.
    pub fn stop(&self, reason: CancelReason) {
        if let Some(source) = lock_active(&self.inner).as_ref() {
            source.cancel(reason);
        }
    }

    /// Resolves once no run is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.busy.borrow()
    }
}

impl Default for RunScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGuard {
    /// Swap in a fresh cancellation channel after a skip-current fired, so
    /// the rest of the run keeps going and a later stop still lands.
    pub fn refresh(&self) -> CancelToken {
        let source = CancelSource::new();
        let token = source.token();
        *lock_active(&self.inner) = Some(source);
        token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *lock_active(&self.inner) = None;
        let _ = self.inner.busy.send(false);
    }
}

fn lock_active(inner: &ScopeInner) -> std::sync::MutexGuard<'_, Option<CancelSource>> {
    inner
        .active
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn token_sees_cancel_reason() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());

        source.cancel(CancelReason::SkipCurrent);
        assert_eq!(token.reason(), Some(CancelReason::SkipCurrent));

        // First reason sticks.
        source.cancel(CancelReason::Abort);
        assert_eq!(token.reason(), Some(CancelReason::SkipCurrent));
    }

    #[tokio::test]
    async fn cancelled_resolves_on_cancel() {
        let source = CancelSource::new();
        let token = source.token();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.cancel(CancelReason::Abort);

        let reason = waiter.await.expect("join");
        assert_eq!(reason, CancelReason::Abort);
    }

    #[tokio::test]
    async fn dropped_source_reads_as_abort() {
        let source = CancelSource::new();
        let token = source.token();
        drop(source);
        assert_eq!(token.cancelled().await, CancelReason::Abort);
    }

    #[tokio::test]
    async fn acquire_cancels_and_waits_out_previous_run() {
        let scope = RunScope::new();
        let (guard, token) = scope.acquire().await;
        assert!(scope.is_running());

        // Previous run: holds its guard until it observes cancellation.
        let previous = tokio::spawn(async move {
            let reason = token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
            reason
        });

        let (guard2, token2) = scope.acquire().await;
        // acquire returned, so the previous run must be fully done.
        assert!(previous.is_finished(), "acquire must wait out the previous run");
        assert_eq!(previous.await.expect("join"), CancelReason::Abort);
        assert!(!token2.is_cancelled());

        drop(guard2);
        assert!(!scope.is_running());
    }

    #[tokio::test]
    async fn refresh_outlives_skip_current() {
        let scope = RunScope::new();
        let (guard, token) = scope.acquire().await;

        scope.stop(CancelReason::SkipCurrent);
        assert_eq!(token.reason(), Some(CancelReason::SkipCurrent));

        let token = guard.refresh();
        assert!(!token.is_cancelled(), "refreshed token starts clean");

        scope.stop(CancelReason::Abort);
        assert_eq!(token.reason(), Some(CancelReason::Abort));
    }

    #[tokio::test]
    async fn wait_idle_returns_after_guard_drop() {
        let scope = RunScope::new();
        let (guard, _token) = scope.acquire().await;

        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.expect("join");
        assert!(!scope.is_running());
    }
}
