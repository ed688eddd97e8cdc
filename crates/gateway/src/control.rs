//! Control-plane operations other services invoke on the gateway.
//!
//! Every operation is acknowledged, including when it names a session this
//! gateway does not hold.

use crate::connection::ConnId;
use crate::gateway::Gateway;
use bytes::Bytes;
use common::messages::decode;
use common::subjects::ControlMethod;
use common::{
    BroadcastMsgToSessionRequest, ChangeSessionLogicRequest, CloseSessionRequest,
    RouteMsgToSessionRequest,
};
use metrics::counter;
use tracing::{debug, info};

/// A decoded control-plane request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    ChangeSessionLogic(ChangeSessionLogicRequest),
    CloseSession(CloseSessionRequest),
    RouteMsgToSession(RouteMsgToSessionRequest),
    BroadcastMsgToSession(BroadcastMsgToSessionRequest),
}

impl ControlRequest {
    /// Parse the payload of a request addressed to `method`.
    pub fn decode(method: ControlMethod, payload: &[u8]) -> common::error::Result<Self> {
        Ok(match method {
            ControlMethod::ChangeSessionLogic => Self::ChangeSessionLogic(decode(payload)?),
            ControlMethod::CloseSession => Self::CloseSession(decode(payload)?),
            ControlMethod::RouteMsgToSession => Self::RouteMsgToSession(decode(payload)?),
            ControlMethod::BroadcastMsgToSession => Self::BroadcastMsgToSession(decode(payload)?),
        })
    }

    pub fn method(&self) -> ControlMethod {
        match self {
            Self::ChangeSessionLogic(_) => ControlMethod::ChangeSessionLogic,
            Self::CloseSession(_) => ControlMethod::CloseSession,
            Self::RouteMsgToSession(_) => ControlMethod::RouteMsgToSession,
            Self::BroadcastMsgToSession(_) => ControlMethod::BroadcastMsgToSession,
        }
    }
}

impl Gateway {
    pub fn handle_control(&mut self, request: ControlRequest) {
        counter!("gateway_control_requests_total", "method" => request.method().as_str()).increment(1);
        match request {
            ControlRequest::ChangeSessionLogic(req) => self.change_session_logic(req),
            ControlRequest::CloseSession(req) => self.close_session(req),
            ControlRequest::RouteMsgToSession(req) => self.route_msg_to_session(req),
            ControlRequest::BroadcastMsgToSession(req) => self.broadcast_msg_to_session(req),
        }
    }

    /// Point a session at a different logic service.
    pub fn change_session_logic(&mut self, req: ChangeSessionLogicRequest) {
        match self.registry.clients.get_mut(&req.session_id) {
            Some(client) => {
                info!(
                    "Session {} logic service {} -> {}",
                    req.session_id, client.alloc_logic_service, req.alloc_logic_service
                );
                client.alloc_logic_service = req.alloc_logic_service;
            }
            None => debug!("change_session_logic: unknown session {}", req.session_id),
        }
    }

    /// Force-close the socket of a session.
    pub fn close_session(&mut self, req: CloseSessionRequest) {
        match self.registry.clients.get(&req.session_id).map(|c| c.conn) {
            Some(conn) => self.force_close(conn, "closed by control plane"),
            None => debug!("close_session: unknown session {}", req.session_id),
        }
    }

    /// Push a body to each listed session this gateway holds.
    pub fn route_msg_to_session(&mut self, req: RouteMsgToSessionRequest) {
        debug!("route_msg_to_session to {} sessions", req.session_ids.len());
        let targets: Vec<ConnId> = req
            .session_ids
            .iter()
            .filter_map(|id| self.registry.clients.get(id).map(|c| c.conn))
            .collect();
        for conn in targets {
            self.push_to_client(conn, req.body.clone());
        }
    }

    /// Push a body to every authenticated session.
    pub fn broadcast_msg_to_session(&mut self, req: BroadcastMsgToSessionRequest) {
        let targets: Vec<ConnId> = self.registry.clients.values().map(|c| c.conn).collect();
        debug!("broadcast_msg_to_session to {} sessions", targets.len());
        for conn in targets {
            self.push_to_client(conn, req.body.clone());
        }
    }

    /// Server-initiated push, outside the per-session request pipeline.
    fn push_to_client(&mut self, conn: ConnId, body: Bytes) {
        let Some(record) = self.registry.connections.get(conn) else {
            return;
        };
        if record.closing {
            return;
        }
        if record.handle.push(body) {
            counter!("gateway_pushed_messages_total").increment(1);
        } else {
            self.force_close(conn, "outbound buffer full");
        }
    }
}
