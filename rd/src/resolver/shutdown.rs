//! Cooperative shutdown signal
//!
//! Signal handlers trigger it; the loop checks it between steps and the bot
//! wait selects on it.

use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn trigger(&self) {
        info!("Shutdown requested, finishing current step");
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_returns_if_already_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.wait()).await.unwrap();
    }
}
