//! Per-session shutdown latch.

use tokio::sync::watch;

/// One-shot broadcast flag. Once triggered it stays set.
///
/// Backed by a [`watch`] channel so pumps on other tasks can both poll it
/// cheaply before a read and await the transition if they need to.
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag. Returns `true` only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_once() {
        let signal = ShutdownSignal::new();
        let observer = signal.subscribe();
        assert!(!*observer.borrow());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(*observer.borrow());
    }

    #[tokio::test]
    async fn test_subscribers_observe_trigger() {
        let signal = ShutdownSignal::new();
        let mut early = signal.subscribe();
        signal.trigger();
        let late = signal.subscribe();
        assert!(*late.borrow());
        early.changed().await.unwrap();
        assert!(*early.borrow());
    }
}
