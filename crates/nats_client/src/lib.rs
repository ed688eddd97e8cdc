//! NATS connection used as the RPC broker between cluster services.

pub mod client;

pub use client::NatsClient;
