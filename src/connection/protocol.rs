//! Chat Socket Wire Protocol
//!
//! Single responsibility: Encode and decode frames in the socket's msgpack envelope.
//!
//! # Wire Format
//!
//! Every binary WebSocket message is one envelope, msgpack-encoded as a map:
//!
//! ```text
//! {
//!     "type": "request" | "response",
//!     "request": {                  // present when type = "request"
//!         "request_id": <u64>,
//!         "verb": <string>,
//!         "path": <string>,
//!         "body": <binary>,
//!         "headers": [<string>],    // "name:value"
//!     },
//!     "response": {                 // present when type = "response"
//!         "request_id": <u64>,      // matches the request being answered
//!         "status": <u16>,
//!         "message": <string>,
//!         "body": <binary>,
//!         "headers": [<string>],
//!     }
//! }
//! ```
//!
//! Bodies are opaque; higher layers decide what they carry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SocketError;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Request,
    Response,
}

/// A request, sent by either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub request_id: u64,
    pub verb: String,
    pub path: String,
    #[serde(default)]
    pub body: Bytes,
    #[serde(default)]
    pub headers: Vec<String>,
}

impl RequestFrame {
    pub fn new(request_id: u64, verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id,
            verb: verb.into(),
            path: path.into(),
            body: Bytes::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(format!("{}:{}", name, value));
        self
    }
}

/// A response correlated to a request by `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub request_id: u64,
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub body: Bytes,
    #[serde(default)]
    pub headers: Vec<String>,
}

impl ResponseFrame {
    pub fn new(request_id: u64, status: u16, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            message: message.into(),
            body: Bytes::new(),
            headers: Vec::new(),
        }
    }

    /// The `200 OK` acknowledgement for a peer request.
    pub fn ok(request_id: u64) -> Self {
        Self::new(request_id, 200, "OK")
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request: Option<RequestFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<ResponseFrame>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
}

impl Frame {
    pub fn request_id(&self) -> u64 {
        match self {
            Frame::Request(r) => r.request_id,
            Frame::Response(r) => r.request_id,
        }
    }
}

/// Encode a request envelope.
pub fn encode_request(request: &RequestFrame) -> Result<Vec<u8>, SocketError> {
    encode(&Envelope {
        frame_type: FrameType::Request,
        request: Some(request.clone()),
        response: None,
    })
}

/// Encode a response envelope.
pub fn encode_response(response: &ResponseFrame) -> Result<Vec<u8>, SocketError> {
    encode(&Envelope {
        frame_type: FrameType::Response,
        request: None,
        response: Some(response.clone()),
    })
}

fn encode(envelope: &Envelope) -> Result<Vec<u8>, SocketError> {
    rmp_serde::to_vec_named(envelope)
        .map_err(|e| SocketError::Codec(format!("Failed to encode envelope: {}", e)))
}

/// Decode one envelope received from the wire.
pub fn decode_frame(data: &[u8]) -> Result<Frame, SocketError> {
    let envelope: Envelope = rmp_serde::from_slice(data)
        .map_err(|e| SocketError::Codec(format!("Failed to decode envelope: {}", e)))?;

    match envelope.frame_type {
        FrameType::Request => envelope
            .request
            .map(Frame::Request)
            .ok_or_else(|| SocketError::Codec("Request envelope without request".into())),
        FrameType::Response => envelope
            .response
            .map(Frame::Response)
            .ok_or_else(|| SocketError::Codec("Response envelope without response".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_survives_the_wire() {
        let request = RequestFrame::new(42, "PUT", "/api/v1/message")
            .with_body(vec![0u8, 1, 2, 255])
            .with_header("content-type", "application/x-protobuf");

        let bytes = encode_request(&request).unwrap();
        match decode_frame(&bytes).unwrap() {
            Frame::Request(decoded) => assert_eq!(decoded, request),
            other => panic!("Expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_response_keeps_request_id_for_correlation() {
        let response = ResponseFrame::ok(7).with_body(&b"{}"[..]);
        let frame = decode_frame(&encode_response(&response).unwrap()).unwrap();
        assert_eq!(frame.request_id(), 7);
        assert_eq!(frame, Frame::Response(response));
    }

    #[test]
    fn test_envelope_type_without_payload_is_rejected() {
        let bytes = rmp_serde::to_vec_named(&Envelope {
            frame_type: FrameType::Response,
            request: None,
            response: None,
        })
        .unwrap();
        assert!(matches!(decode_frame(&bytes), Err(SocketError::Codec(_))));
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        assert!(matches!(
            decode_frame(&[0xc1, 0x00, 0x13]),
            Err(SocketError::Codec(_))
        ));
    }
}
