//! Chat Connection Module
//!
//! The persistent socket and everything it speaks.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `state` | Connection states and the replay-latest state stream |
//! | `protocol` | Msgpack request/response envelope |
//! | `transport` | Physical WebSocket (tokio-tungstenite, restricted TLS) |
//! | `socket` | Lifecycle, failure classification, request correlation |
//!
//! The socket never retries on its own; `HealthMonitor` owns that policy.

pub mod protocol;
pub mod socket;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use protocol::{decode_frame, encode_request, encode_response, Frame, RequestFrame, ResponseFrame};
pub use socket::{
    classify_failure, ConnectionSocket, ConnectionSocketBuilder, LivenessObserver, SocketConfig,
    SocketListener, UrlProvider, KEEP_ALIVE_ID_BASE,
};
pub use state::{ConnectionState, StateCell, StateStream};
pub use transport::{
    restricted_tls_config, Connector, HandshakeRequest, PhysicalSocket, SocketFailure, WsConnector,
};
