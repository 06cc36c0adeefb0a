//! Scripted connector for unit tests.
//!
//! Every `open` is recorded; tests drive the socket by calling the captured
//! listener directly.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::protocol::{decode_frame, Frame, RequestFrame, ResponseFrame};
use super::socket::{ConnectionSocket, SocketListener};
use super::transport::{Connector, HandshakeRequest, PhysicalSocket};

#[derive(Default)]
pub struct ScriptedHandle {
    canceled: AtomicBool,
    refuse_writes: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedHandle {
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn refuse_writes(&self) {
        self.refuse_writes.store(true, Ordering::SeqCst);
    }

    pub fn sent_requests(&self) -> Vec<RequestFrame> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Request(r) => Some(r),
                Frame::Response(_) => None,
            })
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<ResponseFrame> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Response(r) => Some(r),
                Frame::Request(_) => None,
            })
            .collect()
    }

    fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .map(|bytes| decode_frame(bytes).unwrap())
            .collect()
    }
}

struct ScriptedSocket(Arc<ScriptedHandle>);

impl PhysicalSocket for ScriptedSocket {
    fn send_binary(&self, data: Vec<u8>) -> bool {
        if self.0.refuse_writes.load(Ordering::SeqCst) || self.0.is_canceled() {
            return false;
        }
        self.0.sent.lock().push(data);
        true
    }

    fn cancel(&self) {
        self.0.canceled.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct OpenedSocket {
    pub request: HandshakeRequest,
    pub listener: SocketListener,
    pub handle: Arc<ScriptedHandle>,
}

#[derive(Default)]
pub struct ScriptedConnector {
    opened: Mutex<Vec<OpenedSocket>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<OpenedSocket> {
        self.opened.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last(&self) -> OpenedSocket {
        self.opened.lock().last().cloned().expect("no socket opened")
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, request: HandshakeRequest, listener: SocketListener) -> Box<dyn PhysicalSocket> {
        let handle = Arc::new(ScriptedHandle::default());
        self.opened.lock().push(OpenedSocket {
            request,
            listener,
            handle: Arc::clone(&handle),
        });
        Box::new(ScriptedSocket(handle))
    }
}

pub fn socket_with(connector: &Arc<ScriptedConnector>) -> Arc<ConnectionSocket> {
    ConnectionSocket::builder(
        Arc::clone(connector) as Arc<dyn Connector>,
        Arc::new(|| "wss://chat.example/v1/websocket/".to_string()),
        Arc::new(|| "Basic dGVzdDp0ZXN0".to_string()),
    )
    .build()
}
