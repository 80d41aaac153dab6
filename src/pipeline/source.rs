//! Source stage: synthesizes customer queries at a fixed cadence.

use std::time::Duration;
use tracing::info;

use super::{RunClock, StageStats};
use crate::broker::Broker;
use crate::envelope::{QueryIdGenerator, QUERY_CATALOG};
use crate::error::BrokerError;

pub const SOURCE_STAGE: &str = "INTAKE";

/// Publishes one new query to the entry topic every `interval`.
///
/// The first query goes out one full interval after the stage starts, and
/// no query is published at or after the deadline.
pub struct SourceStage {
    topic: String,
    broker: Box<dyn Broker>,
    interval: Duration,
    catalog: Vec<String>,
}

impl SourceStage {
    pub fn new(topic: impl Into<String>, broker: Box<dyn Broker>, interval: Duration) -> Self {
        Self {
            topic: topic.into(),
            broker,
            interval,
            catalog: QUERY_CATALOG.iter().map(|q| q.to_string()).collect(),
        }
    }

    /// Replace the example query catalog
    pub fn with_catalog(mut self, catalog: Vec<String>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Run until `duration` has elapsed. A failed publish is fatal.
    pub async fn run(self, duration: Duration) -> Result<StageStats, BrokerError> {
        let clock = RunClock::start(duration);
        let mut ids = QueryIdGenerator::new();
        let mut stats = StageStats::default();
        let mut next = clock.started() + self.interval;

        info!(stage = SOURCE_STAGE, topic = %self.topic, "Stage started");

        while next < clock.deadline() {
            tokio::time::sleep_until(next).await;
            next += self.interval;

            let query = ids.next_query(self.catalog.as_slice());
            let payload = serde_json::to_vec(&query)
                .map_err(|e| BrokerError::publish(&self.topic, e))?;
            self.broker.publish(&self.topic, payload).await?;

            stats.published += 1;
            info!(
                stage = SOURCE_STAGE,
                query_id = %query.query_id,
                "New query: {}",
                query.customer_query
            );
        }

        info!(stage = SOURCE_STAGE, %stats, "Stage stopped");
        Ok(stats)
    }
}
