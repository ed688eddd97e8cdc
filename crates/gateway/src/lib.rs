//! Session gateway: the edge process between client sockets and the
//! backend services of a cluster.
//!
//! This service:
//! - Accepts length-prefixed TCP connections from clients
//! - Verifies each connection's session key with the session manager
//! - Forwards client messages to the session's logic service, one call at a time
//! - Serves control-plane requests to push, broadcast, reassign and close sessions
//!
//! ## Architecture
//!
//! ```text
//! client sockets        broker: <gate_name>.*
//!      ↓                        ↓
//! ClientListener       ControlPlaneListener
//!      ↓                        ↓
//!      └──── GatewayEvent queue ┘ ← BrokerRpcClient replies
//!                 ↓
//!          GatewayWorker (owns Gateway)
//!                 ↓
//!   session_mgr.* / <logic>.route_logic_msg
//! ```
//!
//! All gateway state is owned by a single worker task, so handlers never
//! lock and events are applied in the order they are queued.

pub mod api;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod gateway;
pub mod inbound;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod rpc;
pub mod stats;
pub mod tcp_server;
pub mod verifier;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use api::{create_router, AppState};
pub use config::GatewayConfig;
pub use connection::{ConnId, ConnState, ConnectionHandle};
pub use control::ControlRequest;
pub use error::{GatewayError, Result, RpcError};
pub use gateway::{Gateway, GatewaySettings};
pub use inbound::ControlPlaneListener;
pub use registry::{ClientInfo, Registry};
pub use rpc::{BrokerRpcClient, CallToken, Continuation, RpcClient, RpcTransport};
pub use stats::{GatewayStats, StatsSnapshot};
pub use tcp_server::{ClientListener, ConnectionSettings};
pub use worker::{GatewayEvent, GatewayWorker};
