//! NATS client wrapper for request/reply RPC.

use anyhow::Result;
use async_nats::{Client, ConnectOptions, Subscriber};
use bytes::Bytes;
use tracing::{debug, info};

/// Wrapper around the NATS core client.
///
/// Request timeouts are disabled at the connection level; callers that want
/// one apply it themselves so a timeout has the same meaning on every transport.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to a NATS server, announcing `name` as the connection name.
    pub async fn connect_named(url: &str, name: Option<&str>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let mut options = ConnectOptions::new().request_timeout(None);
        if let Some(name) = name {
            options = options.name(name);
        }
        let client = options.connect(url).await?;
        Ok(Self { client })
    }

    /// Subscribe to a subject pattern using NATS Core (low-latency push).
    pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
        info!("Subscribing to subject pattern: {}", subject);
        let subscriber = self.client.subscribe(subject.to_string()).await?;
        Ok(subscriber)
    }

    /// Send a request and wait for the first reply payload.
    pub async fn request(&self, subject: String, payload: Bytes) -> Result<Bytes> {
        debug!("NATS request to {} ({} bytes)", subject, payload.len());
        let reply = self.client.request(subject, payload).await?;
        Ok(reply.payload)
    }

    /// Publish a message (fire-and-forget).
    pub async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }

    /// Flush buffered publishes to the server.
    pub async fn flush(&self) -> Result<()> {
        self.client.flush().await?;
        Ok(())
    }
}
