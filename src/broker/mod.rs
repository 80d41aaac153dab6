//! Broker boundary
//!
//! Stages never call each other; they only publish to and poll from named
//! topics through these traits. [`crate::nats::NatsClient`] is the production
//! implementation and [`MemoryBroker`] an in-process one.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::BrokerError;

pub use memory::MemoryBroker;

/// A topic to provision before the pipeline starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replicas: u32,
}

impl TopicSpec {
    /// Single partition, replication factor 1
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replicas: 1,
        }
    }
}

/// A message handed out by a [`Subscription`], pending acknowledgement
#[derive(Debug)]
pub struct Delivery {
    pub payload: Vec<u8>,
    token: u64,
}

impl Delivery {
    pub(crate) fn new(payload: Vec<u8>, token: u64) -> Self {
        Self { payload, token }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }
}

/// A consumer-group subscription to one topic
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for messages and return at most `max` of them.
    ///
    /// Returns an empty batch when the timeout elapses with nothing to read.
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<Delivery>, BrokerError>;

    /// Acknowledge a delivery so the group does not see it again.
    async fn ack(&mut self, delivery: Delivery) -> Result<(), BrokerError>;
}

/// A connection to the message broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create any missing topics. Topics that already exist count as success.
    async fn ensure_topics(&self, topics: &[TopicSpec]) -> Result<(), BrokerError>;

    /// Publish one payload to `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Join consumer group `group` on `topic`.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// Opens broker connections, one per stage
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Broker>, BrokerError>;
}
