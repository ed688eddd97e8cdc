//! Process configuration, read from the environment.

use crate::error::{GatewayError, Result};
use crate::gateway::{GatewaySettings, DEFAULT_MAX_MSG_QUEUE_SIZE};
use crate::protocol::DEFAULT_MAX_FRAME_LENGTH;
use crate::tcp_server::{ConnectionSettings, CLIENT_CHANNEL_BUFFER_SIZE};
use common::subjects::SESSION_MGR;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 4096;
pub const DEFAULT_HTTP_PORT: u16 = 8084;
pub const DEFAULT_METRICS_PORT: u16 = 9094;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub gate_name: String,
    pub broker_url: String,
    /// Client listen address, `host:port`.
    pub listen_addr: String,
    pub max_msg_queue_size: usize,
    pub rpc_timeout: Option<Duration>,
    pub max_frame_length: usize,
    pub client_channel_buffer_size: usize,
    pub event_queue_size: usize,
    pub http_port: u16,
    pub metrics_port: u16,
    pub session_mgr_service: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(GatewayError::MissingEnv(name));

        let gate_name = required("GATE_NAME")?;
        let broker_url = required("BROKER_URL")?;
        let listen_addr = parse_listen_addr(&required("GATE_LISTEN")?)?;

        let max_msg_queue_size = positive("MAX_MSG_QUEUE_SIZE", get("MAX_MSG_QUEUE_SIZE"), DEFAULT_MAX_MSG_QUEUE_SIZE)?;
        let rpc_timeout = match get("RPC_TIMEOUT_MS") {
            Some(raw) => Some(Duration::from_millis(positive("RPC_TIMEOUT_MS", Some(raw), 0u64)?)),
            None => None,
        };
        let max_frame_length = positive("MAX_FRAME_LENGTH", get("MAX_FRAME_LENGTH"), DEFAULT_MAX_FRAME_LENGTH)?;
        let client_channel_buffer_size = positive(
            "CLIENT_CHANNEL_BUFFER_SIZE",
            get("CLIENT_CHANNEL_BUFFER_SIZE"),
            CLIENT_CHANNEL_BUFFER_SIZE,
        )?;
        let event_queue_size = positive("EVENT_QUEUE_SIZE", get("EVENT_QUEUE_SIZE"), DEFAULT_EVENT_QUEUE_SIZE)?;
        let http_port = parse("HTTP_PORT", get("HTTP_PORT"), DEFAULT_HTTP_PORT)?;
        let metrics_port = parse("METRICS_PORT", get("METRICS_PORT"), DEFAULT_METRICS_PORT)?;
        let session_mgr_service = get("SESSION_MGR_SERVICE").unwrap_or_else(|| SESSION_MGR.to_string());

        Ok(Self {
            gate_name,
            broker_url,
            listen_addr,
            max_msg_queue_size,
            rpc_timeout,
            max_frame_length,
            client_channel_buffer_size,
            event_queue_size,
            http_port,
            metrics_port,
            session_mgr_service,
        })
    }

    /// Settings for the gateway core.
    pub fn settings(&self) -> GatewaySettings {
        let mut settings = GatewaySettings::new(self.gate_name.clone()).with_max_msg_queue_size(self.max_msg_queue_size);
        settings.session_mgr_service = self.session_mgr_service.clone();
        settings
    }

    /// Limits applied to every client socket.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_frame_length: self.max_frame_length,
            outbound_buffer: self.client_channel_buffer_size,
        }
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  GATE_NAME: {}", self.gate_name);
        info!("  BROKER_URL: {}", self.broker_url);
        info!("  GATE_LISTEN: {}", self.listen_addr);
        info!("  MAX_MSG_QUEUE_SIZE: {}", self.max_msg_queue_size);
        info!("  RPC_TIMEOUT_MS: {:?}", self.rpc_timeout.map(|t| t.as_millis()));
        info!("  SESSION_MGR_SERVICE: {}", self.session_mgr_service);
        info!("  HTTP_PORT: {}", self.http_port);
        info!("  METRICS_PORT: {}", self.metrics_port);
    }
}

fn parse<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| GatewayError::InvalidConfig {
            name,
            reason: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

fn positive<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = parse(name, raw, default)?;
    if value == T::default() {
        return Err(GatewayError::InvalidConfig {
            name,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

/// Accept `host:port` with an optional `tcp://` prefix. An empty host binds all interfaces.
fn parse_listen_addr(raw: &str) -> Result<String> {
    let invalid = |reason: &str| GatewayError::InvalidConfig {
        name: "GATE_LISTEN",
        reason: format!("'{}': {}", raw, reason),
    };
    let addr = raw.strip_prefix("tcp://").unwrap_or(raw);
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok(format!("{}:{}", host, port))
}
