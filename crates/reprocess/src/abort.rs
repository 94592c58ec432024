use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cooperative abort flag for one run at a time
///
/// Holds the token of the active run, if any. Starting a run and installing
/// its fresh token happen under one lock, so a request never lands on a
/// stale token. Once requested, a token stays cancelled until the run ends.
#[derive(Debug, Default)]
pub struct AbortController {
    current: Mutex<Option<CancellationToken>>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run active with a fresh flag; `None` while another run is active
    pub fn begin_run(&self) -> Option<CancellationToken> {
        let mut current = self.lock();
        if current.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *current = Some(token.clone());
        Some(token)
    }

    pub fn end_run(&self) {
        *self.lock() = None;
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Set the flag of the active run
    ///
    /// Returns `None` when idle, otherwise whether this was the first request.
    pub fn request(&self) -> Option<bool> {
        let current = self.lock();
        let token = current.as_ref()?;
        let first = !token.is_cancelled();
        token.cancel();
        Some(first)
    }

    pub fn is_requested(&self) -> bool {
        self.lock().as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
