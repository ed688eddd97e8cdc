//! Client-facing TCP listener.
//!
//! Each socket runs in its own task: frames read from the socket become
//! worker events, frames pushed by the worker are written back, and the
//! worker can cancel the socket at any time through its handle.

use crate::connection::{ConnId, ConnectionHandle};
use crate::protocol::{client_codec, DEFAULT_MAX_FRAME_LENGTH};
use crate::worker::GatewayEvent;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default buffer size for a connection's outbound frames.
pub const CLIENT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub max_frame_length: usize,
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            outbound_buffer: CLIENT_CHANNEL_BUFFER_SIZE,
        }
    }
}

/// Accepts client sockets and bridges them to the gateway worker.
pub struct ClientListener {
    listener: TcpListener,
    events: mpsc::Sender<GatewayEvent>,
    settings: ConnectionSettings,
}

impl ClientListener {
    pub fn new(listener: TcpListener, events: mpsc::Sender<GatewayEvent>, settings: ConnectionSettings) -> Self {
        Self {
            listener,
            events,
            settings,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Accepting clients on {:?}", self.listener.local_addr().ok());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Client listener stopped");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(handle_connection(
                                stream,
                                peer,
                                self.events.clone(),
                                self.settings,
                                shutdown.child_token(),
                            ));
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }
            }
        }
    }
}

/// Drive one client socket until either side closes it.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::Sender<GatewayEvent>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {}: {}", peer, e);
    }

    let (tx, mut rx) = mpsc::channel::<Bytes>(settings.outbound_buffer);
    let handle = ConnectionHandle::new(tx, shutdown.clone(), Some(peer));
    let (assigned_tx, assigned_rx) = oneshot::channel();
    if events
        .send(GatewayEvent::Accepted {
            handle,
            assigned: assigned_tx,
        })
        .await
        .is_err()
    {
        return;
    }
    let Ok(conn) = assigned_rx.await else {
        return;
    };
    info!("Client {} connected from {}", conn, peer);

    let (mut sink, mut frames) = Framed::new(stream, client_codec(settings.max_frame_length)).split();

    // Forward pushed frames to the socket.
    let writer_shutdown = shutdown.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = writer_shutdown.cancelled() => break,

                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if sink.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = sink.close().await;
        writer_shutdown.cancel();
    });

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            frame = frames.next() => {
                match frame {
                    Some(Ok(body)) => {
                        let event = GatewayEvent::Message { conn, body: body.freeze() };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Read error on {}: {}", conn, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    shutdown.cancel();
    let _ = send_task.await;
    report_broken(&events, conn).await;
    info!("Client {} disconnected", conn);
}

async fn report_broken(events: &mpsc::Sender<GatewayEvent>, conn: ConnId) {
    if events.send(GatewayEvent::Broken { conn }).await.is_err() {
        debug!("Worker gone, {} not reported", conn);
    }
}
