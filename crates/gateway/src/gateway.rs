//! Gateway core state and event dispatch.
//!
//! [`Gateway`] is plain synchronous state owned by the worker. The handlers
//! live next to the component they belong to: connection lifecycle in
//! `registry`, the verification handshake in `verifier`, per-session
//! forwarding in `router` and the inbound RPC surface in `control`.

use crate::connection::ConnId;
use crate::error::RpcError;
use crate::registry::Registry;
use crate::rpc::{CallToken, Continuation, RpcClient};
use crate::stats::GatewayStats;
use crate::worker::GatewayEvent;
use bytes::Bytes;
use common::subjects::SESSION_MGR;
use common::EmptyAck;
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default bound of a session's pending queue.
pub const DEFAULT_MAX_MSG_QUEUE_SIZE: usize = 64;

/// Settings the core needs from the process configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Identity announced to the session manager.
    pub gate_name: String,
    /// Service that verifies session keys.
    pub session_mgr_service: String,
    /// Maximum messages waiting behind an in-flight call, per session.
    pub max_msg_queue_size: usize,
}

impl GatewaySettings {
    pub fn new(gate_name: impl Into<String>) -> Self {
        Self {
            gate_name: gate_name.into(),
            session_mgr_service: SESSION_MGR.to_string(),
            max_msg_queue_size: DEFAULT_MAX_MSG_QUEUE_SIZE,
        }
    }

    pub fn with_max_msg_queue_size(mut self, size: usize) -> Self {
        self.max_msg_queue_size = size;
        self
    }
}

/// Gateway state: connection registry, outstanding calls and the RPC client.
pub struct Gateway {
    pub(crate) settings: GatewaySettings,
    pub(crate) registry: Registry,
    continuations: HashMap<CallToken, Continuation>,
    next_token: u64,
    rpc: Arc<dyn RpcClient>,
    stats: Arc<GatewayStats>,
}

impl Gateway {
    pub fn new(settings: GatewaySettings, rpc: Arc<dyn RpcClient>, stats: Arc<GatewayStats>) -> Self {
        Self {
            settings,
            registry: Registry::new(),
            continuations: HashMap::new(),
            next_token: 0,
            rpc,
            stats,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of calls whose reply has not been processed yet.
    pub fn outstanding_calls(&self) -> usize {
        self.continuations.len()
    }

    /// Apply one event to the gateway state.
    pub fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Accepted { handle, assigned } => {
                let conn = self.on_connection_accepted(handle);
                if assigned.send(conn).is_err() {
                    // Socket task gone before it learned its id.
                    self.on_connection_broken(conn);
                }
            }
            GatewayEvent::Message { conn, body } => self.on_message(body, conn),
            GatewayEvent::Broken { conn } => self.on_connection_broken(conn),
            GatewayEvent::RpcReply { token, result } => self.on_rpc_reply(token, result),
            GatewayEvent::Control { request, ack } => {
                self.handle_control(request);
                let _ = ack.send(EmptyAck {});
            }
        }
        self.publish_stats();
    }

    /// Resume the continuation registered for `token`.
    pub fn on_rpc_reply(&mut self, token: CallToken, result: Result<Bytes, RpcError>) {
        let Some(continuation) = self.continuations.remove(&token) else {
            debug!("Reply for unknown {}", token);
            return;
        };

        match continuation {
            Continuation::VerifySession { conn } => {
                let reply = result.and_then(|payload| {
                    common::messages::decode(&payload).map_err(|e| RpcError::Decode(e.to_string()))
                });
                self.verify_session_callback(reply, conn);
            }
            Continuation::RouteLogicMsg { session_id, conn } => {
                self.route_logic_msg_callback(result.map(|_| ()), &session_id, conn);
            }
        }
    }

    /// Encode `request` and start a call that resumes `continuation`.
    pub(crate) fn issue_call<T: Serialize>(
        &mut self,
        subject: String,
        request: &T,
        continuation: Continuation,
    ) -> Result<CallToken, common::Error> {
        let payload = common::messages::encode(request)?;
        self.next_token += 1;
        let token = CallToken::new(self.next_token);
        self.continuations.insert(token, continuation);
        debug!("Calling {} as {}", subject, token);
        self.rpc.call(token, subject, payload);
        Ok(token)
    }

    /// Publish `notice` with no reply expected.
    pub(crate) fn notify<T: Serialize>(&self, subject: String, notice: &T) {
        match common::messages::encode(notice) {
            Ok(payload) => self.rpc.notify(subject, payload),
            Err(e) => error!("Failed to encode notice for {}: {}", subject, e),
        }
    }

    /// Close a connection on the gateway's initiative.
    ///
    /// Frames it has already sent are ignored from here on, a pending
    /// verification is abandoned, and whatever its session still had queued
    /// is discarded.
    pub(crate) fn force_close(&mut self, conn: ConnId, reason: &'static str) {
        let Some(record) = self.registry.connections.get_mut(conn) else {
            return;
        };
        if !record.closing {
            info!("Closing {}: {}", conn, reason);
            counter!("gateway_forced_closes_total", "reason" => reason).increment(1);
        }
        record.closing = true;
        record.handle.close();
        // A verdict still on its way no longer belongs to this socket.
        self.registry.wait_verify.remove(&conn);

        if let Some(session_id) = record.session_id().map(str::to_string) {
            if let Some(client) = self.registry.clients.get_mut(&session_id) {
                if client.conn == conn {
                    client.pending.clear();
                }
            }
        }
    }

    fn publish_stats(&self) {
        self.stats.record(
            self.registry.connections.len(),
            self.registry.clients.len(),
            self.registry.wait_verify.len(),
        );
    }
}
