//! Topic provisioning, run once before any stage starts.

use crate::broker::{Broker, TopicSpec};
use crate::config::TopicNames;
use crate::error::BrokerError;

/// The four pipeline topics, single partition, replication factor 1
pub fn pipeline_topics(names: &TopicNames) -> Vec<TopicSpec> {
    names.all().iter().map(|name| TopicSpec::new(*name)).collect()
}

/// Idempotently ensure every topic exists.
///
/// Topics that already exist are success; any other failure is returned and
/// is fatal to startup.
pub async fn ensure_topics(broker: &dyn Broker, names: &TopicNames) -> Result<(), BrokerError> {
    let topics = pipeline_topics(names);
    broker.ensure_topics(&topics).await?;

    tracing::info!(count = topics.len(), "Topics ready");
    Ok(())
}
