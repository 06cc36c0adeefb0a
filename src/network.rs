//! OS connectivity signal.
//!
//! Bridges platform connectivity notifications into a single "network became
//! available" callback. Platforms with a push API call `on_available` /
//! `on_lost` directly; elsewhere `spawn_probe` polls TCP reachability and
//! reports the lost -> available edge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::listeners::{Listeners, Subscription};

/// How long a single reachability probe may take.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Connectivity as seen by the health monitor.
pub trait NetworkState: Send + Sync {
    fn is_available(&self) -> bool;

    fn subscribe(&self, callback: Box<dyn Fn() + Send + Sync>) -> Subscription;
}

/// Connectivity tracker with registration handles for "available" callbacks.
pub struct NetworkSignal {
    available: AtomicBool,
    listeners: Listeners,
}

impl NetworkSignal {
    pub fn new(initially_available: bool) -> Self {
        Self {
            available: AtomicBool::new(initially_available),
            listeners: Listeners::new(),
        }
    }

    /// Push API: a network came up. Always notifies, since a new network can
    /// replace an old one without availability ever dropping.
    pub fn on_available(&self) {
        self.available.store(true, Ordering::SeqCst);
        debug!("Network available");
        self.listeners.notify();
    }

    /// Push API: the last network went away.
    pub fn on_lost(&self) {
        self.available.store(false, Ordering::SeqCst);
        debug!("Network lost");
    }

    /// Polling API: record a probe result, notifying on the lost -> available edge.
    pub fn report(&self, available: bool) {
        let previous = self.available.swap(available, Ordering::SeqCst);
        if available && !previous {
            info!("Network reachable again");
            self.listeners.notify();
        } else if !available && previous {
            info!("Network unreachable");
        }
    }

    /// Poll reachability of `probe_addrs` every `interval` until the handle is aborted.
    ///
    /// The network counts as available when any address accepts a TCP
    /// connection. An empty address list always reports available.
    pub fn spawn_probe(
        self: &Arc<Self>,
        probe_addrs: Vec<String>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let signal = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let reachable = probe(&probe_addrs).await;
                signal.report(reachable);
                tokio::time::sleep(interval).await;
            }
        })
    }
}

impl NetworkState for NetworkSignal {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn subscribe(&self, callback: Box<dyn Fn() + Send + Sync>) -> Subscription {
        self.listeners.subscribe(callback)
    }
}

async fn probe(addrs: &[String]) -> bool {
    if addrs.is_empty() {
        return true;
    }
    for addr in addrs {
        match tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(_)) => return true,
            Ok(Err(e)) => debug!(addr = %addr, error = %e, "Reachability probe failed"),
            Err(_) => debug!(addr = %addr, "Reachability probe timed out"),
        }
    }
    false
}
