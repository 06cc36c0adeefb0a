//! Error types for chat-socket

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("No connected connection: {0}")]
    NotConnected(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Request timeout: request {0}")]
    RequestTimeout(u64),

    #[error("Request {0} is already awaiting a response")]
    DuplicateRequestId(u64),

    #[error("Request id {0} is reserved for keep-alives")]
    ReservedRequestId(u64),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
