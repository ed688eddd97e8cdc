//! Connection registry: which sockets exist, which are waiting on the
//! session manager, and which socket currently speaks for each session id.

use crate::connection::{ConnId, ConnState, ConnectionArena, ConnectionHandle, ConnectionRecord, SessionData};
use crate::gateway::Gateway;
use bytes::Bytes;
use chrono::Utc;
use common::subjects::{rpc_subject, SESSION_OFFLINE};
use common::SessionOfflineNotice;
use metrics::counter;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// Routing state of one verified session.
#[derive(Debug)]
pub struct ClientInfo {
    /// The only connection allowed to represent this session.
    pub conn: ConnId,
    /// Logic service currently handling the session.
    pub alloc_logic_service: String,
    /// Bodies waiting behind the in-flight call, oldest first.
    pub(crate) pending: VecDeque<Bytes>,
    /// A routed call is outstanding.
    pub(crate) in_flight: bool,
}

impl ClientInfo {
    pub fn new(conn: ConnId, alloc_logic_service: String) -> Self {
        Self {
            conn,
            alloc_logic_service,
            pending: VecDeque::new(),
            in_flight: false,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

/// All per-connection and per-session state of the gateway.
#[derive(Default)]
pub struct Registry {
    pub(crate) connections: ConnectionArena,
    /// Connections whose session key is with the session manager.
    pub(crate) wait_verify: HashSet<ConnId>,
    /// Session id → routing state.
    pub(crate) clients: HashMap<String, ClientInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self, conn: ConnId) -> Option<&ConnectionRecord> {
        self.connections.get(conn)
    }

    pub fn connection_state(&self, conn: ConnId) -> Option<ConnState> {
        self.connections.get(conn).map(ConnectionRecord::state)
    }

    pub fn client(&self, session_id: &str) -> Option<&ClientInfo> {
        self.clients.get(session_id)
    }

    pub fn is_waiting_verification(&self, conn: ConnId) -> bool {
        self.wait_verify.contains(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.clients.len()
    }

    /// Routing state for `conn`'s session, only if `conn` still owns it.
    pub(crate) fn owned_client_mut(&mut self, conn: ConnId) -> Option<(String, &mut ClientInfo)> {
        let session_id = self.connections.get(conn)?.session_id()?.to_string();
        let client = self.clients.get_mut(&session_id).filter(|c| c.conn == conn)?;
        Some((session_id, client))
    }
}

impl Gateway {
    /// Register a freshly accepted socket.
    pub fn on_connection_accepted(&mut self, handle: ConnectionHandle) -> ConnId {
        let peer = handle.peer();
        let conn = self
            .registry
            .connections
            .insert(ConnectionRecord::new(handle, Utc::now().timestamp_millis()));
        counter!("gateway_connections_total").increment(1);
        debug!("Accepted {} from {:?}", conn, peer);
        conn
    }

    /// Tear down everything attached to a socket that went away.
    ///
    /// The session manager hears about it only if `conn` was still the
    /// authoritative socket for its session.
    pub fn on_connection_broken(&mut self, conn: ConnId) {
        let Some(record) = self.registry.connections.remove(conn) else {
            debug!("Broken event for unknown {}", conn);
            return;
        };
        counter!("gateway_disconnections_total").increment(1);

        match &record.session {
            None => {}
            Some(session) if !session.is_valid() => {
                self.registry.wait_verify.remove(&conn);
            }
            Some(session) => {
                let authoritative = self
                    .registry
                    .clients
                    .get(session.id())
                    .is_some_and(|c| c.conn == conn);
                if authoritative {
                    self.registry.clients.remove(session.id());
                    self.notify_session_offline(session);
                }
            }
        }

        info!(
            "{} disconnected (session {})",
            conn,
            record.session.as_ref().map(SessionData::id).unwrap_or("-")
        );
        record.handle.close();
    }

    /// Dispatch a client frame according to the connection's handshake state.
    pub fn on_message(&mut self, body: Bytes, conn: ConnId) {
        let Some(record) = self.registry.connections.get(conn) else {
            debug!("Message for unknown {}", conn);
            return;
        };
        if record.closing {
            return;
        }

        match record.state() {
            ConnState::Unauthenticated => self.verify_session_id(body, conn),
            // Clients may not send anything until verification completes.
            ConnState::Pending => self.force_close(conn, "message before verification"),
            ConnState::Authenticated => self.route_logic_msg(body, conn),
        }
    }

    fn notify_session_offline(&self, session: &SessionData) {
        let notice = SessionOfflineNotice {
            session_id: session.id().to_string(),
            online_time: session.online_time(),
        };
        let subject = rpc_subject(&self.settings.session_mgr_service, SESSION_OFFLINE);
        self.notify(subject, &notice);
        counter!("gateway_sessions_offline_total").increment(1);
    }
}
