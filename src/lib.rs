//! Chat Socket
//!
//! Keeps a messaging client connected to its backend over one persistent,
//! multiplexed WebSocket.
//!
//! ## Architecture
//!
//! ```text
//!   NetworkSignal ──┐
//!   AppForeground ──┼─ wake ─▶ HealthMonitor ──connect/cancel──▶ ConnectionSocket ──▶ WsConnector
//!   CredentialStore ┘            ▲   keep-alive, backoff,              │  state stream,
//!   HostRotation ────────────────┘   host failover                     │  request/response
//!                                    ◀────────── liveness ─────────────┘
//! ```
//!
//! - `ConnectionSocket` owns at most one physical socket and turns its
//!   events into a `ConnectionState`. It never retries on its own.
//! - `HealthMonitor` is the only caller of the socket's lifecycle methods
//!   and carries all retry policy.
//! - Collaborators (`HostSelector`, `LoginState`, `NetworkState`,
//!   `ForegroundState`) are traits so the core runs without a platform.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod foreground;
pub mod hosts;
pub mod listeners;
pub mod logging;
pub mod login;
pub mod monitor;
pub mod network;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::Config;
pub use connection::{
    ConnectionSocket, ConnectionState, Connector, Frame, HandshakeRequest, LivenessObserver,
    PhysicalSocket, RequestFrame, ResponseFrame, SocketConfig, SocketFailure, SocketListener,
    StateStream, WsConnector,
};
pub use error::SocketError;
pub use foreground::{AppForeground, ForegroundState};
pub use hosts::{HostRotation, HostSelector};
pub use listeners::{Listeners, Subscription};
pub use login::{BasicCredential, CredentialAccessor, CredentialStore, LoginState};
pub use monitor::{HealthMonitor, MonitorConfig};
pub use network::{NetworkSignal, NetworkState};
