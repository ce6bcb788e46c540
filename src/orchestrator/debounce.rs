//! Single-slot cancellable timer

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

/// At most one pending timer; arming replaces whatever was pending.
///
/// The callback runs on the timer task after the delay. Work that must not be
/// cancelled by a later `arm` should be spawned from the callback rather than
/// awaited in it.
#[derive(Default)]
pub struct DebounceTimer {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending timer, then schedule `callback` after `delay`
    pub fn arm<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.slot();
        if let Some(pending) = slot.take() {
            pending.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
    }

    /// Cancel the pending timer. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        match self.slot().take() {
            Some(pending) => {
                let was_pending = !pending.is_finished();
                pending.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot()
            .as_ref()
            .map(|pending| !pending.is_finished())
            .unwrap_or(false)
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
