#![allow(dead_code)]

use chat_socket::{
    ConnectionSocket, ConnectionState, Connector, HandshakeRequest, PhysicalSocket, SocketListener,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct Handle {
    pub canceled: AtomicBool,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

struct FakeSocket(Arc<Handle>);

impl PhysicalSocket for FakeSocket {
    fn send_binary(&self, data: Vec<u8>) -> bool {
        if self.0.canceled.load(Ordering::SeqCst) {
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
pub struct Opened {
    pub request: HandshakeRequest,
    pub listener: SocketListener,
    pub handle: Arc<Handle>,
}

/// Connector whose sockets are driven by the test.
#[derive(Default)]
pub struct FakeConnector {
    opened: Mutex<Vec<Opened>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<Opened> {
        self.opened.lock().clone()
    }

    pub fn last(&self) -> Opened {
        self.opened.lock().last().cloned().expect("no socket opened")
    }
}

impl Connector for FakeConnector {
    fn open(&self, request: HandshakeRequest, listener: SocketListener) -> Box<dyn PhysicalSocket> {
        let handle = Arc::new(Handle::default());
        self.opened.lock().push(Opened {
            request,
            listener,
            handle: Arc::clone(&handle),
        });
        Box::new(FakeSocket(handle))
    }
}

/// Let spawned tasks run without advancing paused time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub async fn wait_for_state(socket: &ConnectionSocket, expected: ConnectionState) {
    let mut states = socket.subscribe();
    tokio::time::timeout(Duration::from_secs(10), states.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", expected))
        .expect("state stream closed");
}
