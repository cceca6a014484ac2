//! Shutdown signalling checked at every suspension point.

use tokio::sync::watch;

/// Sending half, owned by `main`.
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // No receivers left means nobody to stop.
        let _ = self.0.send(true);
    }
}

/// Receiving half, cloned into every loop.
#[derive(Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown { rx: Some(rx) })
    }

    /// A handle that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Trigger dropped without firing.
                return std::future::pending().await;
            }
        }
    }
}
