//! One-shot completion event for the output direction.
//!
//! The output pump owns the only [`Completion`]; the keepalive driver and the
//! coordinator hold [`CompletionWaiter`]s. The flag lives in a `watch`
//! channel, so a waiter created or polled after the signal still observes it.

use tokio::sync::watch;

/// Signalling side of the event. Not cloneable: there is exactly one writer.
#[derive(Debug)]
pub struct Completion {
    tx: watch::Sender<bool>,
}

/// Observing side of the event.
#[derive(Debug, Clone)]
pub struct CompletionWaiter {
    rx: watch::Receiver<bool>,
}

impl Completion {
    /// Creates an unsignalled event.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a new observer.
    pub fn waiter(&self) -> CompletionWaiter {
        CompletionWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Fires the event. Returns `true` only for the call that fired it.
    pub fn signal(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    /// Returns whether the event has fired.
    pub fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.signal() {
            tracing::debug!("completion signalled on drop");
        }
    }
}

impl CompletionWaiter {
    /// Resolves once the event has fired.
    pub async fn wait(&mut self) {
        // An error means the writer is gone, and it always signals on drop.
        let _ = self.rx.wait_for(|done| *done).await;
    }

    /// Returns whether the event has fired.
    pub fn is_signaled(&self) -> bool {
        *self.rx.borrow()
    }
}
