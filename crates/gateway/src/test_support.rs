//! In-memory harness for driving the gateway core without sockets or a broker.

use crate::connection::{ConnId, ConnectionHandle};
use crate::gateway::{Gateway, GatewaySettings};
use crate::rpc::{CallToken, RpcClient};
use crate::stats::GatewayStats;
use bytes::Bytes;
use common::{ChangeSessionLogicRequest, SessionOnlineReply};
use serde::Serialize;
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct RecordedCall {
    pub token: CallToken,
    pub subject: String,
    pub payload: Bytes,
}

/// Captures calls instead of sending them; replies are fed back by the test.
#[derive(Default)]
pub struct RecordingRpc {
    calls: Mutex<Vec<RecordedCall>>,
    notices: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingRpc {
    pub fn take_calls(&self) -> Vec<RecordedCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn take_notices(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut *self.notices.lock().unwrap())
    }
}

impl RpcClient for RecordingRpc {
    fn call(&self, token: CallToken, subject: String, payload: Bytes) {
        self.calls.lock().unwrap().push(RecordedCall {
            token,
            subject,
            payload,
        });
    }

    fn notify(&self, subject: String, payload: Bytes) {
        self.notices.lock().unwrap().push((subject, payload));
    }
}

/// The client end of a connection registered with the gateway.
pub struct TestClient {
    pub conn: ConnId,
    rx: RefCell<mpsc::Receiver<Bytes>>,
    shutdown: CancellationToken,
}

impl TestClient {
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Frames pushed to this client so far.
    pub fn received(&self) -> Vec<Bytes> {
        let mut rx = self.rx.borrow_mut();
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub struct Harness {
    pub gateway: Gateway,
    pub rpc: Arc<RecordingRpc>,
}

impl Harness {
    pub fn new(max_msg_queue_size: usize) -> Self {
        let rpc = Arc::new(RecordingRpc::default());
        let settings = GatewaySettings::new("gate@test").with_max_msg_queue_size(max_msg_queue_size);
        let gateway = Gateway::new(settings, rpc.clone(), Arc::new(GatewayStats::new()));
        Self { gateway, rpc }
    }

    pub fn connect(&mut self) -> TestClient {
        self.connect_with_buffer(16)
    }

    pub fn connect_with_buffer(&mut self, buffer: usize) -> TestClient {
        let (tx, rx) = mpsc::channel(buffer);
        let shutdown = CancellationToken::new();
        let conn = self
            .gateway
            .on_connection_accepted(ConnectionHandle::new(tx, shutdown.clone(), None));
        TestClient {
            conn,
            rx: RefCell::new(rx),
            shutdown,
        }
    }

    pub fn send(&mut self, client: &TestClient, body: &str) {
        self.gateway
            .on_message(Bytes::copy_from_slice(body.as_bytes()), client.conn);
    }

    pub fn reply_json<T: Serialize>(&mut self, token: CallToken, reply: &T) {
        let payload = common::messages::encode(reply).unwrap();
        self.gateway.on_rpc_reply(token, Ok(payload));
    }

    pub fn reply_empty(&mut self, token: CallToken) {
        self.gateway.on_rpc_reply(token, Ok(Bytes::new()));
    }

    /// Send `key` and answer the verification with `session_id` on `logic`.
    pub fn authenticate(&mut self, client: &TestClient, key: &str, session_id: &str, logic: &str) {
        self.send(client, key);
        let call = self
            .rpc
            .take_calls()
            .pop()
            .expect("verification call issued");
        self.reply_json(
            call.token,
            &SessionOnlineReply {
                session_id: session_id.to_string(),
                err: String::new(),
                alloc_logic_service: logic.to_string(),
            },
        );
    }

    pub fn change_logic(&mut self, session_id: &str, logic: &str) {
        self.gateway.change_session_logic(ChangeSessionLogicRequest {
            session_id: session_id.to_string(),
            alloc_logic_service: logic.to_string(),
        });
    }
}
