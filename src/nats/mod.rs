/// NATS JetStream integration module
///
/// Provides the JetStream-backed broker used by every pipeline stage

pub mod client;

pub use client::{NatsClient, NatsConfig};
