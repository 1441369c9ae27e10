use cocaine_core::CocaineError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Runs one connect attempt at a time.
///
/// Callers that queued up while an attempt was in flight take its outcome instead of
/// starting their own. Callers arriving after it finished start a new one.
pub(crate) struct ConnectGate {
    lock: tokio::sync::Mutex<()>,
    finished: AtomicU64,
    last_error: Mutex<Option<CocaineError>>,
}

impl ConnectGate {
    pub(crate) fn new() -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            finished: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// How many attempts have completed
    #[inline]
    pub(crate) fn attempts(&self) -> u64 {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) async fn run<R, F, Fut>(&self, ready: R, attempt: F) -> Result<(), CocaineError>
    where
        R: Fn() -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), CocaineError>>,
    {
        let seen = self.attempts();
        let _guard = self.lock.lock().await;
        if ready() {
            return Ok(());
        }
        if self.attempts() != seen {
            // an attempt completed while we were waiting for it
            let last = self.last_error.lock().clone();
            if let Some(e) = last {
                return Err(e);
            }
        }
        let res = attempt().await;
        *self.last_error.lock() = res.as_ref().err().cloned();
        self.finished.fetch_add(1, Ordering::AcqRel);
        res
    }
}
