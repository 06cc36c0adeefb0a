//! Health Monitor
//!
//! The only driver of a `ConnectionSocket`'s lifecycle. Three loops run per
//! monitored socket:
//!
//! - **keep-alive**: every cadence, send a keep-alive while connected, or
//!   force a disconnect once keep-alives have gone unanswered for too long
//! - **reconnect**: on every reconnectable state, wait for login, back off,
//!   wait for the network, then `connect()`
//! - **watchdog**: cancel a connect attempt stuck in `Connecting` and move
//!   to the next host
//!
//! Network and foreground signals feed one coalescing wake channel which
//! ends a backoff early and re-checks network availability.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::{connecting_timeout, exponential_backoff, with_jitter};
use super::wake::{wake_channel, WakeReceiver, WakeSignal};
use crate::clock::{Clock, TokioClock};
use crate::connection::{ConnectionSocket, ConnectionState, LivenessObserver};
use crate::foreground::ForegroundState;
use crate::hosts::HostSelector;
use crate::listeners::Subscription;
use crate::login::LoginState;
use crate::network::NetworkState;

/// Monitor timing.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Server-side idle timeout; keep-alives go out at a third of it
    pub keep_alive_timeout: Duration,
    /// Upper bound of the reconnect backoff
    pub max_backoff: Duration,
    /// Randomize each backoff by +/-25%
    pub backoff_jitter: bool,
    /// How often to re-check login while logged out
    pub login_poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(5),
            backoff_jitter: true,
            login_poll_interval: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    pub fn keep_alive_cadence(&self) -> Duration {
        self.keep_alive_timeout / 3
    }

    /// Unanswered-keep-alive window after which the socket is considered dead.
    pub fn stale_threshold(&self) -> Duration {
        self.keep_alive_cadence() * 3
    }
}

struct MonitorSession {
    tasks: Vec<JoinHandle<()>>,
    _subscriptions: Vec<Subscription>,
    wake: Arc<WakeSignal>,
}

/// Keep-alive, reconnect and host failover policy for one connection.
pub struct HealthMonitor {
    config: MonitorConfig,
    hosts: Arc<dyn HostSelector>,
    login: Arc<dyn LoginState>,
    network: Arc<dyn NetworkState>,
    foreground: Arc<dyn ForegroundState>,
    clock: Arc<dyn Clock>,
    attempts: AtomicU32,
    last_sent_at: AtomicU64,
    last_response_at: AtomicU64,
    session: Mutex<Option<MonitorSession>>,
}

impl HealthMonitor {
    pub fn new(
        config: MonitorConfig,
        hosts: Arc<dyn HostSelector>,
        login: Arc<dyn LoginState>,
        network: Arc<dyn NetworkState>,
        foreground: Arc<dyn ForegroundState>,
    ) -> Self {
        Self {
            config,
            hosts,
            login,
            network,
            foreground,
            clock: Arc::new(TokioClock::new()),
            attempts: AtomicU32::new(0),
            last_sent_at: AtomicU64::new(0),
            last_response_at: AtomicU64::new(0),
            session: Mutex::new(None),
        }
    }

    /// Replace the clock used for keep-alive bookkeeping.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_monitoring(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Start supervising `socket`. A second call while monitoring is ignored.
    ///
    /// Installs this monitor as the socket's liveness observer, replacing
    /// any observer set on the builder.
    pub fn monitor(self: &Arc<Self>, socket: &Arc<ConnectionSocket>) {
        let mut session = self.session.lock();
        if session.is_some() {
            warn!(socket = %socket.name(), "Already monitoring, ignoring duplicate call");
            return;
        }
        info!(socket = %socket.name(), "Starting monitoring");

        let now = self.clock.now_millis();
        self.last_sent_at.store(now, Ordering::SeqCst);
        self.last_response_at.store(now, Ordering::SeqCst);
        socket.set_liveness(Arc::clone(self) as Arc<dyn LivenessObserver>);

        let (wake, wake_rx) = wake_channel();
        let subscriptions = vec![
            self.foreground.subscribe(waker(&wake)),
            self.network.subscribe(waker(&wake)),
        ];

        let tasks = vec![
            tokio::spawn(Arc::clone(self).keep_alive_loop(Arc::clone(socket))),
            tokio::spawn(Arc::clone(self).reconnect_loop(Arc::clone(socket), wake_rx)),
            tokio::spawn(Arc::clone(self).connecting_watchdog(Arc::clone(socket))),
        ];

        *session = Some(MonitorSession {
            tasks,
            _subscriptions: subscriptions,
            wake,
        });
    }

    /// Stop every loop and release the signals. A no-op when not monitoring.
    ///
    /// When `socket` is given, its connection is cancelled as well.
    pub fn stop_monitoring(&self, socket: Option<&ConnectionSocket>) {
        let Some(session) = self.session.lock().take() else {
            warn!("Not monitoring, ignoring stop call");
            return;
        };
        info!("Stopping monitoring");

        for task in &session.tasks {
            task.abort();
        }
        session.wake.close();
        drop(session);

        if let Some(socket) = socket {
            info!(socket = %socket.name(), "Disconnecting monitored socket");
            socket.cancel_connection();
        }
    }

    /// Skip the remaining backoff: reset the attempt counter and wake the
    /// reconnect loop. The reset applies even when not monitoring.
    pub fn expedite_reconnect(&self) {
        info!(monitoring = self.is_monitoring(), "Expediting reconnect");
        self.attempts.store(0, Ordering::SeqCst);
        if let Some(session) = self.session.lock().as_ref() {
            session.wake.wake();
        }
    }

    async fn keep_alive_loop(self: Arc<Self>, socket: Arc<ConnectionSocket>) {
        let cadence = self.config.keep_alive_cadence();
        let threshold = self.config.stale_threshold().as_millis() as u64;

        loop {
            tokio::time::sleep(cadence).await;
            if socket.state() != ConnectionState::Connected {
                continue;
            }

            // Measured between our own sends, not against "now": a suspended
            // process must not look like a dead peer.
            let sent = self.last_sent_at.load(Ordering::SeqCst);
            let response = self.last_response_at.load(Ordering::SeqCst);
            if sent.saturating_sub(response) > threshold {
                warn!(
                    socket = %socket.name(),
                    last_sent_at = sent,
                    last_response_at = response,
                    "Missed keep-alives, disconnecting"
                );
                socket.disconnect_when_connected();
            } else {
                debug!(socket = %socket.name(), "Sending keep-alive");
                if let Err(e) = socket.send_keep_alive() {
                    warn!(socket = %socket.name(), error = %e, "Keep-alive send failed");
                }
                self.last_sent_at.store(self.clock.now_millis(), Ordering::SeqCst);
            }
        }
    }

    async fn reconnect_loop(self: Arc<Self>, socket: Arc<ConnectionSocket>, mut wake: WakeReceiver) {
        let mut states = socket.subscribe();

        loop {
            let state = *states.borrow_and_update();
            info!(socket = %socket.name(), state = %state, "Monitor observed state");

            if state == ConnectionState::UnknownHostFailed {
                info!(socket = %socket.name(), "Host unreachable, switching host");
                self.hosts.switch_to_next();
            }

            if state.needs_reconnect() {
                if !self.redo_connect(&socket, &mut wake).await {
                    debug!(socket = %socket.name(), "Wake channel closed, reconnect loop exiting");
                    return;
                }
            } else if state == ConnectionState::Connected {
                self.attempts.store(0, Ordering::SeqCst);
                self.hosts.record_success();
            }

            if states.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait for login, back off, wait for the network, then connect.
    ///
    /// Returns false when the wake channel closed while waiting.
    async fn redo_connect(&self, socket: &ConnectionSocket, wake: &mut WakeReceiver) -> bool {
        if !self.login.is_authenticated() {
            info!(socket = %socket.name(), "Waiting for login");
            while !self.login.is_authenticated() {
                tokio::time::sleep(self.config.login_poll_interval).await;
            }
            info!(socket = %socket.name(), "Logged in, continuing reconnect");
        }

        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if attempts > 1 {
            let mut backoff = exponential_backoff(attempts, self.config.max_backoff);
            if self.config.backoff_jitter {
                backoff = with_jitter(backoff);
            }
            warn!(
                socket = %socket.name(),
                attempts = attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Connection attempt failed, backing off"
            );
            match tokio::time::timeout(backoff, wake.recv()).await {
                Ok(true) => info!(socket = %socket.name(), "Backoff interrupted by wake"),
                Ok(false) => return false,
                Err(_) => debug!(socket = %socket.name(), "Backoff completed"),
            }
        }

        while !self.network.is_available() {
            info!(socket = %socket.name(), "Network unavailable, waiting");
            if !wake.recv().await {
                return false;
            }
        }

        socket.connect();
        true
    }

    async fn connecting_watchdog(self: Arc<Self>, socket: Arc<ConnectionSocket>) {
        let mut states = socket.subscribe();

        loop {
            let state = *states.borrow_and_update();
            if state != ConnectionState::Connecting {
                if states.changed().await.is_err() {
                    return;
                }
                continue;
            }

            let timeout = connecting_timeout(self.attempts(), self.hosts.host_count());
            debug!(socket = %socket.name(), timeout_ms = timeout.as_millis() as u64, "Watching connect attempt");

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    let timed_out = socket.cancel_if_connecting(|| {
                        warn!(
                            socket = %socket.name(),
                            timeout_ms = timeout.as_millis() as u64,
                            "Connect attempt timed out, switching host"
                        );
                        self.hosts.switch_to_next();
                    });
                    if !timed_out {
                        debug!(socket = %socket.name(), "Connect attempt settled before the watchdog fired");
                    }
                    if states.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl LivenessObserver for HealthMonitor {
    fn on_keep_alive_response(&self) {
        self.last_response_at
            .store(self.clock.now_millis(), Ordering::SeqCst);
    }
}

fn waker(wake: &Arc<WakeSignal>) -> Box<dyn Fn() + Send + Sync> {
    let wake = Arc::clone(wake);
    Box::new(move || wake.wake())
}
