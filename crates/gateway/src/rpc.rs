//! Outbound calls to backend services.
//!
//! The gateway core never awaits a reply. It hands `(token, subject, payload)`
//! to an [`RpcClient`] and records what to do when the reply comes back (a
//! [`Continuation`]). The client performs the call off the worker and feeds
//! `(token, result)` back onto the worker queue as [`GatewayEvent::RpcReply`].

use crate::connection::ConnId;
use crate::error::RpcError;
use crate::worker::GatewayEvent;
use async_trait::async_trait;
use bytes::Bytes;
use nats_client::NatsClient;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Correlates an outbound call with its continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallToken(u64);

impl CallToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CallToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Work left to do when a call completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Finish the verification handshake of `conn`.
    VerifySession { conn: ConnId },
    /// Advance the per-session pipeline of `session_id` as owned by `conn`.
    RouteLogicMsg { session_id: String, conn: ConnId },
}

/// Non-blocking call surface used by the gateway core.
pub trait RpcClient: Send + Sync {
    /// Start a request. The reply arrives later as an `RpcReply` event carrying `token`.
    fn call(&self, token: CallToken, subject: String, payload: Bytes);

    /// Publish without expecting a reply.
    fn notify(&self, subject: String, payload: Bytes);
}

/// Request/reply transport underneath [`BrokerRpcClient`].
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes, RpcError>;

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), RpcError>;
}

#[async_trait]
impl RpcTransport for NatsClient {
    async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes, RpcError> {
        NatsClient::request(self, subject, payload)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), RpcError> {
        NatsClient::publish(self, subject, payload)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

/// [`RpcClient`] that runs each call as its own task and reports back to the worker.
pub struct BrokerRpcClient<T: RpcTransport> {
    transport: Arc<T>,
    events: mpsc::Sender<GatewayEvent>,
    /// No timeout when `None`: an unanswered call stalls its continuation.
    timeout: Option<Duration>,
}

impl<T: RpcTransport> BrokerRpcClient<T> {
    pub fn new(transport: Arc<T>, events: mpsc::Sender<GatewayEvent>, timeout: Option<Duration>) -> Self {
        Self {
            transport,
            events,
            timeout,
        }
    }
}

impl<T: RpcTransport> RpcClient for BrokerRpcClient<T> {
    fn call(&self, token: CallToken, subject: String, payload: Bytes) {
        let transport = self.transport.clone();
        let events = self.events.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let request = transport.request(subject, payload);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, request).await {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Timeout(limit)),
                },
                None => request.await,
            };
            if events.send(GatewayEvent::RpcReply { token, result }).await.is_err() {
                debug!("Worker gone, dropping reply for {}", token);
            }
        });
    }

    fn notify(&self, subject: String, payload: Bytes) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.publish(subject.clone(), payload).await {
                warn!("Failed to publish to {}: {}", subject, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies with the request payload reversed, or never for subjects starting with "slow".
    #[derive(Default)]
    struct MockTransport {
        published: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes, RpcError> {
            if subject.starts_with("slow") {
                std::future::pending::<()>().await;
            }
            if subject.starts_with("down") {
                return Err(RpcError::Transport("no responders".to_string()));
            }
            let mut reversed = payload.to_vec();
            reversed.reverse();
            Ok(Bytes::from(reversed))
        }

        async fn publish(&self, subject: String, payload: Bytes) -> Result<(), RpcError> {
            self.published.lock().unwrap().push((subject, payload));
            Ok(())
        }
    }

    async fn next_reply(rx: &mut mpsc::Receiver<GatewayEvent>) -> (CallToken, Result<Bytes, RpcError>) {
        match rx.recv().await {
            Some(GatewayEvent::RpcReply { token, result }) => (token, result),
            other => panic!("expected RpcReply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_delivers_reply_with_token() {
        let (tx, mut rx) = mpsc::channel(8);
        let client = BrokerRpcClient::new(Arc::new(MockTransport::default()), tx, None);

        client.call(CallToken::new(7), "logic.route_logic_msg".to_string(), Bytes::from_static(b"abc"));

        let (token, result) = next_reply(&mut rx).await;
        assert_eq!(token, CallToken::new(7));
        assert_eq!(result.unwrap(), Bytes::from_static(b"cba"));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (tx, mut rx) = mpsc::channel(8);
        let limit = Duration::from_millis(20);
        let client = BrokerRpcClient::new(Arc::new(MockTransport::default()), tx, Some(limit));

        client.call(CallToken::new(1), "slow.route_logic_msg".to_string(), Bytes::new());

        let (token, result) = next_reply(&mut rx).await;
        assert_eq!(token, CallToken::new(1));
        assert_eq!(result, Err(RpcError::Timeout(limit)));
    }

    #[tokio::test]
    async fn test_transport_error_is_delivered() {
        let (tx, mut rx) = mpsc::channel(8);
        let client = BrokerRpcClient::new(Arc::new(MockTransport::default()), tx, None);

        client.call(CallToken::new(2), "down.session_online".to_string(), Bytes::new());

        let (_, result) = next_reply(&mut rx).await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_notify_publishes() {
        let (tx, _rx) = mpsc::channel(8);
        let transport = Arc::new(MockTransport::default());
        let client = BrokerRpcClient::new(transport.clone(), tx, None);

        client.notify("session_mgr.session_offline".to_string(), Bytes::from_static(b"{}"));

        for _ in 0..50 {
            if !transport.published.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "session_mgr.session_offline");
    }
}
