//! Per-session forwarding of client payloads to the assigned logic service.
//!
//! Each session has at most one `route_logic_msg` call outstanding. Payloads
//! arriving meanwhile wait in a bounded FIFO and are released one per
//! completed call, so the logic service sees them in client order.

use crate::connection::ConnId;
use crate::error::RpcError;
use crate::gateway::Gateway;
use crate::rpc::Continuation;
use bytes::Bytes;
use common::subjects::{rpc_subject, ROUTE_LOGIC_MSG};
use common::RouteLogicMsgRequest;
use metrics::counter;
use tracing::{debug, error, warn};

impl Gateway {
    /// Forward a payload from an authenticated connection.
    pub fn route_logic_msg(&mut self, body: Bytes, conn: ConnId) {
        let max_queue = self.settings.max_msg_queue_size;
        let Some((session_id, client)) = self.registry.owned_client_mut(conn) else {
            // Superseded socket still draining its last frames.
            debug!("Dropping message from {}: not the session owner", conn);
            return;
        };

        if client.pending.len() >= max_queue {
            warn!(
                "Pending queue full for session {} ({} messages)",
                session_id,
                client.pending.len()
            );
            counter!("gateway_queue_overflows_total").increment(1);
            self.force_close(conn, "pending queue full");
            return;
        }

        if client.in_flight {
            client.pending.push_back(body);
            debug!(
                "Queued message for session {} (queue size {})",
                session_id,
                client.pending.len()
            );
            return;
        }

        client.in_flight = true;
        let service = client.alloc_logic_service.clone();
        self.dispatch_logic_msg(session_id, service, body, conn);
    }

    /// Completion of a routed call: release the next queued payload, if any.
    pub fn route_logic_msg_callback(&mut self, result: Result<(), RpcError>, session_id: &str, conn: ConnId) {
        let Some(client) = self
            .registry
            .clients
            .get_mut(session_id)
            .filter(|c| c.conn == conn)
        else {
            debug!("Dropping stale route reply for session {} on {}", session_id, conn);
            counter!("gateway_stale_replies_total", "call" => "route_logic_msg").increment(1);
            return;
        };

        if let Err(e) = result {
            warn!("Routing for session {} failed: {}", session_id, e);
            client.in_flight = false;
            client.pending.clear();
            self.force_close(conn, "logic service call failed");
            return;
        }

        match client.pending.pop_front() {
            None => client.in_flight = false,
            Some(body) => {
                let service = client.alloc_logic_service.clone();
                self.dispatch_logic_msg(session_id.to_string(), service, body, conn);
            }
        }
    }

    fn dispatch_logic_msg(&mut self, session_id: String, service: String, body: Bytes, conn: ConnId) {
        let subject = rpc_subject(&service, ROUTE_LOGIC_MSG);
        let request = RouteLogicMsgRequest {
            session_id: session_id.clone(),
            body,
        };
        match self.issue_call(subject, &request, Continuation::RouteLogicMsg { session_id, conn }) {
            Ok(_) => {
                counter!("gateway_routed_messages_total").increment(1);
            }
            Err(e) => {
                error!("Failed to encode route_logic_msg for {}: {}", conn, e);
                if let Some((_, client)) = self.registry.owned_client_mut(conn) {
                    client.in_flight = false;
                }
                self.force_close(conn, "route request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RpcError;
    use crate::test_support::Harness;
    use bytes::Bytes;
    use common::RouteLogicMsgRequest;

    fn routed(payload: &[u8]) -> RouteLogicMsgRequest {
        common::messages::decode(payload).unwrap()
    }

    #[test]
    fn test_first_message_is_forwarded_immediately() {
        let mut h = Harness::new(4);
        let client = h.connect();
        h.authenticate(&client, "K1", "S1", "L1");

        h.send(&client, "hello");

        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].subject, "L1.route_logic_msg");
        let request = routed(&calls[0].payload);
        assert_eq!(request.session_id, "S1");
        assert_eq!(request.body, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_messages_are_forwarded_one_at_a_time_in_order() {
        let mut h = Harness::new(4);
        let client = h.connect();
        h.authenticate(&client, "K1", "S1", "L1");

        h.send(&client, "a");
        h.send(&client, "b");
        h.send(&client, "c");

        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(routed(&calls[0].payload).body, Bytes::from_static(b"a"));
        assert_eq!(h.gateway.registry().client("S1").unwrap().queue_len(), 2);

        h.reply_empty(calls[0].token);
        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(routed(&calls[0].payload).body, Bytes::from_static(b"b"));

        h.reply_empty(calls[0].token);
        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(routed(&calls[0].payload).body, Bytes::from_static(b"c"));

        h.reply_empty(calls[0].token);
        assert!(h.rpc.take_calls().is_empty());
        let info = h.gateway.registry().client("S1").unwrap();
        assert!(!info.is_in_flight());
        assert_eq!(info.queue_len(), 0);
    }

    #[test]
    fn test_pipeline_restarts_after_draining() {
        let mut h = Harness::new(4);
        let client = h.connect();
        h.authenticate(&client, "K1", "S1", "L1");

        h.send(&client, "a");
        let call = h.rpc.take_calls().remove(0);
        h.reply_empty(call.token);

        h.send(&client, "b");
        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(routed(&calls[0].payload).body, Bytes::from_static(b"b"));
    }

    #[test]
    fn test_full_queue_closes_connection() {
        let mut h = Harness::new(2);
        let client = h.connect();
        h.authenticate(&client, "K1", "S1", "L1");

        h.send(&client, "in-flight");
        h.send(&client, "q1");
        h.send(&client, "q2");
        assert_eq!(h.gateway.registry().client("S1").unwrap().queue_len(), 2);
        assert!(!client.is_closed());

        h.send(&client, "overflow");

        assert!(client.is_closed());
        assert!(h.gateway.registry().client("S1").unwrap().queue_len() <= 2);
        assert_eq!(h.rpc.take_calls().len(), 1);
    }

    #[test]
    fn test_next_message_follows_reassigned_logic_service() {
        let mut h = Harness::new(4);
        let client = h.connect();
        h.authenticate(&client, "K1", "S1", "L1");
        h.send(&client, "a");
        h.send(&client, "b");
        let call = h.rpc.take_calls().remove(0);

        h.change_logic("S1", "L2");
        h.reply_empty(call.token);

        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].subject, "L2.route_logic_msg");
    }

    #[test]
    fn test_reply_for_superseded_connection_is_discarded() {
        let mut h = Harness::new(4);
        let old = h.connect();
        h.authenticate(&old, "K1", "S1", "L1");
        h.send(&old, "a");
        h.send(&old, "b");
        let stale = h.rpc.take_calls().remove(0);

        let new = h.connect();
        h.authenticate(&new, "K1", "S1", "L1");
        h.reply_empty(stale.token);

        assert!(h.rpc.take_calls().is_empty());
        let info = h.gateway.registry().client("S1").unwrap();
        assert_eq!(info.conn, new.conn);
        assert_eq!(info.queue_len(), 0);

        h.send(&new, "fresh");
        let calls = h.rpc.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(routed(&calls[0].payload).body, Bytes::from_static(b"fresh"));
    }

    #[test]
    fn test_message_from_superseded_connection_is_dropped() {
        let mut h = Harness::new(4);
        let old = h.connect();
        let new = h.connect();
        h.authenticate(&old, "K1", "S1", "L1");
        h.authenticate(&new, "K1", "S1", "L1");

        // Frame that was already in flight when the old socket was closed.
        h.gateway.on_message(Bytes::from_static(b"late"), old.conn);

        assert!(h.rpc.take_calls().is_empty());
    }

    #[test]
    fn test_failed_route_call_closes_connection() {
        let mut h = Harness::new(4);
        let client = h.connect();
        h.authenticate(&client, "K1", "S1", "L1");
        h.send(&client, "a");
        h.send(&client, "b");
        let call = h.rpc.take_calls().remove(0);

        h.gateway
            .on_rpc_reply(call.token, Err(RpcError::Transport("no responders".to_string())));

        assert!(client.is_closed());
        assert!(h.rpc.take_calls().is_empty());
        assert_eq!(h.gateway.registry().client("S1").unwrap().queue_len(), 0);
    }
}
