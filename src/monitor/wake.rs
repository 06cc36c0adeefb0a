//! Coalescing wake channel.
//!
//! One slot: any number of wakes issued before the receiver looks collapse
//! into a single pending wake. Closing the channel ends every waiter.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sending side. Cheap to call from any thread or callback.
pub struct WakeSignal {
    tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl WakeSignal {
    /// Request a wake; a wake already pending absorbs this one.
    pub fn wake(&self) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }

    /// Close the channel. Later wakes are dropped.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Receiving side, owned by the reconnect loop.
pub struct WakeReceiver {
    rx: mpsc::Receiver<()>,
}

impl WakeReceiver {
    /// Wait for a wake. Returns false once the channel is closed.
    pub async fn recv(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

pub fn wake_channel() -> (Arc<WakeSignal>, WakeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        Arc::new(WakeSignal {
            tx: Mutex::new(Some(tx)),
        }),
        WakeReceiver { rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wakes_coalesce() {
        let (signal, mut rx) = wake_channel();
        for _ in 0..10 {
            signal.wake();
        }
        assert!(rx.recv().await);

        let second = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_waiters() {
        let (signal, mut rx) = wake_channel();
        signal.close();
        signal.wake();
        assert!(signal.is_closed());
        assert!(!rx.recv().await);
    }
}
