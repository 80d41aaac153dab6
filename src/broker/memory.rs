//! In-process broker
//!
//! Keeps one append-only log per topic and a cursor per consumer group.
//! Deliveries stay pending until acknowledged; a new subscription for a group
//! with pending deliveries rewinds to the oldest one, so the at-least-once
//! contract matches the networked broker.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Broker, BrokerConnector, Delivery, Subscription, TopicSpec};
use crate::error::BrokerError;

#[derive(Debug, Default)]
struct GroupState {
    cursor: usize,
    pending: BTreeSet<usize>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Vec<u8>>>,
    groups: HashMap<(String, String), GroupState>,
    creations: usize,
    unavailable: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Broker backed by process memory
///
/// Clones share the same topics, so each stage can hold its own handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent broker call fail as if the broker were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
        self.inner.notify.notify_waiters();
    }

    /// Names of all provisioned topics, sorted
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// How many topics have actually been created (not merely ensured)
    pub fn creations(&self) -> usize {
        self.lock().creations
    }

    /// Every payload ever published to `topic`, in publish order
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(state: &State) -> Result<(), BrokerError> {
        if state.unavailable {
            Err(BrokerError::Unavailable("memory broker offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_topics(&self, topics: &[TopicSpec]) -> Result<(), BrokerError> {
        let mut state = self.lock();
        Self::check_available(&state)?;

        for spec in topics {
            if !state.topics.contains_key(&spec.name) {
                state.topics.insert(spec.name.clone(), Vec::new());
                state.creations += 1;
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            Self::check_available(&state)?;

            let log = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
            log.push(payload);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.lock();
        Self::check_available(&state)?;

        if !state.topics.contains_key(topic) {
            return Err(BrokerError::UnknownTopic(topic.to_string()));
        }

        let group_state = state
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_default();
        if let Some(&oldest) = group_state.pending.iter().next() {
            group_state.cursor = oldest;
            group_state.pending.clear();
        }

        Ok(Box::new(MemorySubscription {
            broker: self.clone(),
            key: (topic.to_string(), group.to_string()),
        }))
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Broker>, BrokerError> {
        Self::check_available(&self.lock())?;
        Ok(Box::new(self.clone()))
    }
}

struct MemorySubscription {
    broker: MemoryBroker,
    key: (String, String),
}

impl MemorySubscription {
    fn take_ready(&self, max: usize) -> Result<Vec<Delivery>, BrokerError> {
        let mut state = self.broker.lock();
        MemoryBroker::check_available(&state)?;

        let State { topics, groups, .. } = &mut *state;
        let log = topics
            .get(&self.key.0)
            .ok_or_else(|| BrokerError::UnknownTopic(self.key.0.clone()))?;
        let group = groups.entry(self.key.clone()).or_default();

        let end = log.len().min(group.cursor + max);
        let batch = (group.cursor..end)
            .map(|offset| {
                group.pending.insert(offset);
                Delivery::new(log[offset].clone(), offset as u64)
            })
            .collect();
        group.cursor = end;

        Ok(batch)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<Delivery>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wake-ups before looking, so a publish between the
            // check and the wait is not missed.
            let notified = self.broker.inner.notify.notified();

            let batch = self.take_ready(max)?;
            if !batch.is_empty() || max == 0 {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        MemoryBroker::check_available(&state)?;

        if let Some(group) = state.groups.get_mut(&self.key) {
            group.pending.remove(&(delivery.token() as usize));
        }
        Ok(())
    }
}
