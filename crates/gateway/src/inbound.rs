//! Control-plane listener: serves `<gate_name>.<method>` requests from the broker.

use crate::control::ControlRequest;
use crate::error::Result;
use crate::worker::GatewayEvent;
use bytes::Bytes;
use common::messages::encode;
use common::subjects::{control_wildcard, ControlMethod};
use futures::StreamExt;
use metrics::counter;
use nats_client::NatsClient;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolve the operation addressed by `subject` and decode its payload.
pub fn parse_control(gate_name: &str, subject: &str, payload: &[u8]) -> common::error::Result<ControlRequest> {
    let method = ControlMethod::from_subject(gate_name, subject)?;
    ControlRequest::decode(method, payload)
}

/// Bridges broker requests addressed to this gateway into the worker.
pub struct ControlPlaneListener {
    nats: NatsClient,
    gate_name: String,
    events: mpsc::Sender<GatewayEvent>,
}

impl ControlPlaneListener {
    pub fn new(nats: NatsClient, gate_name: String, events: mpsc::Sender<GatewayEvent>) -> Self {
        Self {
            nats,
            gate_name,
            events,
        }
    }

    /// Run until shutdown or until the subscription ends.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let subject = control_wildcard(&self.gate_name);
        let mut subscriber = self.nats.subscribe(&subject).await?;
        info!("Control plane listening on '{}'", subject);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Control plane received shutdown signal");
                    break;
                }

                msg = subscriber.next() => {
                    match msg {
                        Some(msg) => {
                            let Some(request) = self.parse(msg.subject.as_str(), &msg.payload) else {
                                continue;
                            };
                            let (ack_tx, ack_rx) = oneshot::channel();
                            let event = GatewayEvent::Control { request, ack: ack_tx };
                            if self.events.send(event).await.is_err() {
                                warn!("Gateway worker gone, control plane stopping");
                                break;
                            }
                            if let Some(reply) = msg.reply {
                                self.spawn_ack(reply.to_string(), ack_rx);
                            }
                        }
                        None => {
                            warn!("Control plane subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("Control plane stopped");
        Ok(())
    }

    fn parse(&self, subject: &str, payload: &[u8]) -> Option<ControlRequest> {
        match parse_control(&self.gate_name, subject, payload) {
            Ok(request) => {
                debug!("Control request {} on {}", request.method(), subject);
                Some(request)
            }
            Err(e) => {
                warn!("Dropping control request on {}: {}", subject, e);
                counter!("gateway_control_errors_total").increment(1);
                None
            }
        }
    }

    /// Reply once the worker has applied the request.
    fn spawn_ack(&self, reply: String, ack_rx: oneshot::Receiver<common::EmptyAck>) {
        let nats = self.nats.clone();
        tokio::spawn(async move {
            let Ok(ack) = ack_rx.await else {
                return;
            };
            let payload = match encode(&ack) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode ack: {}", e);
                    Bytes::new()
                }
            };
            if let Err(e) = nats.publish(reply, payload).await {
                warn!("Failed to send control ack: {}", e);
            }
        });
    }
}
