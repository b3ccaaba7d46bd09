//! One-shot timers on dedicated threads. Cancelling is idempotent.

use crate::error::DialogResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Runs `callback` once after `delay` unless cancelled first.
pub struct Timer {
    name: String,
    cancel_tx: Mutex<Option<Sender<()>>>,
    fired: Arc<AtomicBool>,
}

impl Timer {
    pub fn start<F>(name: impl Into<String>, delay: Duration, callback: F) -> DialogResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let thread_fired = Arc::clone(&fired);

        std::thread::Builder::new()
            .name(format!("timer_{name}"))
            .spawn(move || {
                // Either an explicit cancel or a dropped sender ends the wait early.
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(delay) {
                    thread_fired.store(true, Ordering::SeqCst);
                    callback();
                }
            })?;

        Ok(Self {
            name,
            cancel_tx: Mutex::new(Some(cancel_tx)),
            fired,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Returns true when the timer was still pending. Safe after it fired.
    pub fn cancel(&self) -> bool {
        let sender = self
            .cancel_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                let _ = tx.send(());
                !self.has_fired()
            }
            None => false,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_once_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::start("t", Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert!(timer.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.cancel());
        assert!(!timer.cancel());
    }

    #[test]
    fn cancel_prevents_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::start("t", Duration::from_secs(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timer.cancel());
        assert!(!timer.cancel());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.has_fired());
    }
}
