/// NATS JetStream client for the pipeline topics
///
/// Each topic maps to one JetStream stream whose only subject is the topic
/// name. Consumer groups map to durable pull consumers with explicit acks.

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use crate::broker::{Broker, BrokerConnector, Delivery, Subscription, TopicSpec};
use crate::error::BrokerError;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub max_age: Duration,
    pub max_bytes: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_string(),
            max_age: Duration::from_secs(24 * 60 * 60), // 24 hours
            max_bytes: 1024 * 1024 * 1024, // 1GB
        }
    }
}

#[derive(Clone)]
pub struct NatsClient {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

/// JetStream stream name for a topic (stream names cannot contain dots)
pub fn stream_name(topic: &str) -> String {
    topic.to_uppercase().replace(['.', '-', ' '], "_")
}

impl NatsClient {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: NatsConfig) -> Result<Self, BrokerError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(BrokerError::unavailable)?;
        tracing::info!("Connected to NATS at {}", config.url);

        let jetstream = jetstream::new(client);

        Ok(Self {
            jetstream,
            config,
        })
    }
}

#[async_trait]
impl Broker for NatsClient {
    async fn ensure_topics(&self, topics: &[TopicSpec]) -> Result<(), BrokerError> {
        for spec in topics {
            // get_or_create treats an existing stream as success
            self.jetstream
                .get_or_create_stream(stream::Config {
                    name: stream_name(&spec.name),
                    subjects: vec![spec.name.clone()],
                    max_age: self.config.max_age,
                    max_bytes: self.config.max_bytes,
                    storage: stream::StorageType::File,
                    num_replicas: spec.replicas.max(1) as usize,
                    ..Default::default()
                })
                .await
                .map_err(|e| BrokerError::topic(&spec.name, e))?;

            tracing::info!(topic = %spec.name, "JetStream stream '{}' ready", stream_name(&spec.name));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // Publish with JetStream (durable, acknowledged)
        let ack = self
            .jetstream
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| BrokerError::publish(topic, e))?;

        ack.await.map_err(|e| BrokerError::publish(topic, e))?;

        tracing::debug!(topic, "Published message to JetStream");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let stream = self
            .jetstream
            .get_stream(stream_name(topic))
            .await
            .map_err(|e| BrokerError::subscription(topic, e))?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    filter_subject: topic.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::subscription(topic, e))?;

        tracing::info!(topic, group, "Consumer ready");

        Ok(Box::new(NatsSubscription {
            topic: topic.to_string(),
            consumer,
            pending: HashMap::new(),
            next_token: 0,
        }))
    }
}

#[async_trait]
impl BrokerConnector for NatsConfig {
    async fn connect(&self) -> Result<Box<dyn Broker>, BrokerError> {
        let client = NatsClient::connect(self.clone()).await?;
        Ok(Box::new(client))
    }
}

struct NatsSubscription {
    topic: String,
    consumer: consumer::Consumer<consumer::pull::Config>,
    pending: HashMap<u64, jetstream::Message>,
    next_token: u64,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<Delivery>, BrokerError> {
        if timeout.is_zero() || max == 0 {
            return Ok(Vec::new());
        }

        let mut messages = self
            .consumer
            .batch()
            .max_messages(max)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| BrokerError::subscription(&self.topic, e))?;

        let mut deliveries = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| BrokerError::subscription(&self.topic, e))?;

            let token = self.next_token;
            self.next_token += 1;

            deliveries.push(Delivery::new(message.payload.to_vec(), token));
            self.pending.insert(token, message);
        }

        Ok(deliveries)
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        if let Some(message) = self.pending.remove(&delivery.token()) {
            message
                .ack()
                .await
                .map_err(|e| BrokerError::subscription(&self.topic, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_is_jetstream_safe() {
        assert_eq!(stream_name("customer-queries"), "CUSTOMER_QUERIES");
        assert_eq!(stream_name("final.responses"), "FINAL_RESPONSES");
    }

    #[test]
    fn test_default_config() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.max_age, Duration::from_secs(86_400));
    }
}
