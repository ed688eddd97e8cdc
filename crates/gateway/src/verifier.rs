//! Session verification handshake.
//!
//! The first frame on a connection is its session key. The session manager
//! turns it into a session id and the logic service that owns the session,
//! or rejects it.

use crate::connection::{ConnId, SessionData};
use crate::error::RpcError;
use crate::gateway::Gateway;
use crate::registry::ClientInfo;
use crate::rpc::Continuation;
use bytes::Bytes;
use common::subjects::{rpc_subject, SESSION_ONLINE};
use common::{SessionOnlineReply, SessionOnlineRequest};
use metrics::counter;
use tracing::{debug, error, info, warn};

impl Gateway {
    /// Attach a pending session to `conn` and ask the session manager about `key`.
    pub fn verify_session_id(&mut self, key: Bytes, conn: ConnId) {
        let Some(record) = self.registry.connections.get_mut(conn) else {
            return;
        };
        let session = SessionData::new(record.accepted_at);
        let online_time = session.online_time();
        record.session = Some(session);
        self.registry.wait_verify.insert(conn);

        debug!("Verifying session key for {} ({} bytes)", conn, key.len());

        let request = SessionOnlineRequest {
            session_key: key,
            online_time,
            gate_name: self.settings.gate_name.clone(),
        };
        let subject = rpc_subject(&self.settings.session_mgr_service, SESSION_ONLINE);
        if let Err(e) = self.issue_call(subject, &request, Continuation::VerifySession { conn }) {
            error!("Failed to encode session_online for {}: {}", conn, e);
            self.registry.wait_verify.remove(&conn);
            self.force_close(conn, "verification request failed");
        }
    }

    /// Finish the handshake of `conn` with the session manager's verdict.
    pub fn verify_session_callback(&mut self, reply: Result<SessionOnlineReply, RpcError>, conn: ConnId) {
        if !self.registry.wait_verify.remove(&conn) {
            // Connection broke while the call was outstanding.
            debug!("Dropping stale verification reply for {}", conn);
            counter!("gateway_stale_replies_total", "call" => "session_online").increment(1);
            return;
        }

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Verification of {} failed: {}", conn, e);
                counter!("gateway_sessions_rejected_total").increment(1);
                self.force_close(conn, "verification failed");
                return;
            }
        };
        if reply.is_rejected() || reply.session_id.is_empty() {
            info!("Session rejected for {}: {}", conn, reply.err);
            counter!("gateway_sessions_rejected_total").increment(1);
            self.force_close(conn, "session rejected");
            return;
        }

        let Some(session) = self
            .registry
            .connections
            .get_mut(conn)
            .and_then(|record| record.session.as_mut())
        else {
            return;
        };
        session.bind(reply.session_id.clone());

        info!(
            "{} verified as session {} (logic service {})",
            conn, reply.session_id, reply.alloc_logic_service
        );
        counter!("gateway_sessions_verified_total").increment(1);

        let previous = self.registry.clients.insert(
            reply.session_id.clone(),
            ClientInfo::new(conn, reply.alloc_logic_service),
        );
        if let Some(previous) = previous.filter(|p| p.conn != conn) {
            info!(
                "Session {} moved from {} to {}",
                reply.session_id, previous.conn, conn
            );
            counter!("gateway_sessions_superseded_total").increment(1);
            self.force_close(previous.conn, "superseded by newer connection");
        }
    }
}
