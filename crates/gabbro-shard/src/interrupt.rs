//! External cancellation signals.
//!
//! Every public store operation takes an [`Interruptor`]. Cancellation is
//! honored while the operation waits for its FIFO turn; once a B-tree
//! transaction has begun, the operation runs to completion.

use tokio::sync::watch;

/// The firing side of a cancellation signal.
#[derive(Debug)]
pub struct InterruptSource {
    tx: watch::Sender<bool>,
}

impl InterruptSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fires the signal. Every [`Interruptor`] derived from this source
    /// observes it; firing twice is harmless.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// An interruptor observing this source.
    pub fn interruptor(&self) -> Interruptor {
        Interruptor {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl Default for InterruptSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct Interruptor {
    /// `None` never fires, for callers that cannot be cancelled.
    rx: Option<watch::Receiver<bool>>,
}

impl Interruptor {
    /// An interruptor that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// True if the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves when the signal fires; pends forever for
    /// [`Interruptor::never`] or once the source is gone unfired.
    pub async fn fired(&self) {
        let mut rx = match &self.rx {
            Some(rx) => rx.clone(),
            None => return std::future::pending().await,
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Source dropped without firing: this signal never will.
                return std::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod interrupt_tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_is_observed() {
        let source = InterruptSource::new();
        let interruptor = source.interruptor();
        assert!(!interruptor.is_fired());

        source.fire();
        assert!(interruptor.is_fired());
        interruptor.fired().await; // resolves immediately
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let interruptor = Interruptor::never();
        assert!(!interruptor.is_fired());

        let timeout =
            tokio::time::timeout(std::time::Duration::from_millis(10), interruptor.fired()).await;
        assert!(timeout.is_err(), "never() must pend forever");
    }
}
