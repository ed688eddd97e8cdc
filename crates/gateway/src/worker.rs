//! The serialized worker: every gateway state mutation runs here.
//!
//! Socket tasks, RPC completions and control-plane requests all become
//! [`GatewayEvent`]s on one bounded queue, drained in order by
//! [`GatewayWorker::run`].

use crate::connection::{ConnId, ConnectionHandle};
use crate::control::ControlRequest;
use crate::error::RpcError;
use crate::gateway::Gateway;
use crate::rpc::CallToken;
use bytes::Bytes;
use common::EmptyAck;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Input to the gateway worker.
#[derive(Debug)]
pub enum GatewayEvent {
    /// A socket was accepted; the worker answers with its id.
    Accepted {
        handle: ConnectionHandle,
        assigned: oneshot::Sender<ConnId>,
    },
    /// A client frame arrived.
    Message { conn: ConnId, body: Bytes },
    /// The socket is gone.
    Broken { conn: ConnId },
    /// An outbound call completed, failed or timed out.
    RpcReply {
        token: CallToken,
        result: Result<Bytes, RpcError>,
    },
    /// A control-plane request; acknowledged once handled.
    Control {
        request: ControlRequest,
        ack: oneshot::Sender<EmptyAck>,
    },
}

/// Owns the [`Gateway`] and drains its event queue.
pub struct GatewayWorker {
    gateway: Gateway,
    events: mpsc::Receiver<GatewayEvent>,
}

impl GatewayWorker {
    pub fn new(gateway: Gateway, events: mpsc::Receiver<GatewayEvent>) -> Self {
        Self { gateway, events }
    }

    /// Run until shutdown or until every event sender is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Gateway worker running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Gateway worker received shutdown signal");
                    break;
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.gateway.handle_event(event),
                        None => {
                            info!("Gateway event queue closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Gateway worker stopped");
    }
}
