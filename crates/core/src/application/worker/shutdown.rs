// Shutdown Token shared by workers and the maintenance loop

use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal; returns at once if already requested
    pub async fn wait(&mut self) {
        if self.is_shutdown() {
            return;
        }
        // Sender dropped counts as shutdown
        let _ = self.rx.changed().await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token holder
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_token_sees_shutdown() {
        let (sender, token) = shutdown_channel();
        let mut a = token.clone();
        let mut b = token;
        assert!(!a.is_shutdown());

        sender.shutdown();
        tokio::time::timeout(Duration::from_secs(1), a.wait()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.wait()).await.unwrap();
        assert!(b.is_shutdown());
    }
}
