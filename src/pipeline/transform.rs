//! Generic transform stage.
//!
//! A [`Transform`] describes one LLM-backed step: which record it reads, the
//! prompt it builds, and how the completion becomes the next record.
//! [`TransformStage`] runs that step as a poll loop, turning every delivery
//! into an [`Outcome`] and publishing or dropping accordingly.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PollSettings, RunClock, StageStats};
use crate::broker::Broker;
use crate::completion::{CompletionClient, CompletionRequest, Turn};
use crate::envelope::{Envelope, QueryRecord};
use crate::error::{BrokerError, StageError};

/// How a stage wants its completion returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// A JSON object the stage parses into its result field
    Structured,
    /// Plain text used as-is
    FreeText,
}

/// One LLM-backed pipeline step.
pub trait Transform: Send + Sync + 'static {
    /// Record this stage requires; deserializing it checks the precondition.
    type Input: DeserializeOwned + QueryRecord + Send;

    /// Record this stage publishes, always carrying the stage's field.
    type Output: Serialize + QueryRecord + Send;

    /// Stage name used in logs
    fn name(&self) -> &'static str;

    fn mode(&self) -> CompletionMode;

    /// Build the prompt turns from the input record.
    fn prompt(&self, input: &Self::Input) -> Vec<Turn>;

    /// Write the completion into the stage's field.
    fn apply(&self, input: Self::Input, completion: String) -> Result<Self::Output, StageError>;
}

/// Result of processing a single delivery.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Forward the augmented record downstream
    Publish(T),
    /// Discard the envelope; it is not retried
    Drop {
        query_id: Option<String>,
        reason: StageError,
    },
}

/// Where a consuming stage reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub input: String,
    pub output: String,
    pub group: String,
}

impl Route {
    pub fn new(input: impl Into<String>, output: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            group: group.into(),
        }
    }
}

/// Poll loop around a [`Transform`].
pub struct TransformStage<T: Transform> {
    transform: T,
    route: Route,
    broker: Box<dyn Broker>,
    completion: Arc<dyn CompletionClient>,
    poll: PollSettings,
}

impl<T: Transform> TransformStage<T> {
    pub fn new(
        transform: T,
        route: Route,
        broker: Box<dyn Broker>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            transform,
            route,
            broker,
            completion,
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Turn one payload into a publish-or-drop decision.
    pub async fn process(&self, payload: &[u8]) -> Outcome<T::Output> {
        let input: T::Input = match serde_json::from_slice(payload) {
            Ok(input) => input,
            Err(e) => {
                return Outcome::Drop {
                    query_id: peek_query_id(payload),
                    reason: StageError::Decode(e),
                }
            }
        };
        let query_id = input.query_id().to_string();

        let turns = self.transform.prompt(&input);
        let request = match self.transform.mode() {
            CompletionMode::Structured => CompletionRequest::structured(turns),
            CompletionMode::FreeText => CompletionRequest::free_text(turns),
        };

        let result = match self.completion.complete(&request).await {
            Ok(completion) => self.transform.apply(input, completion),
            Err(e) => Err(StageError::from(e)),
        };

        match result {
            Ok(output) => Outcome::Publish(output),
            Err(reason) => Outcome::Drop {
                query_id: Some(query_id),
                reason,
            },
        }
    }

    /// Run until `duration` has elapsed.
    ///
    /// Per-message failures are logged and dropped. Broker failures end the
    /// stage with an error.
    pub async fn run(self, duration: Duration) -> Result<StageStats, BrokerError> {
        let clock = RunClock::start(duration);
        let stage = self.transform.name();
        let mut stats = StageStats::default();

        let mut subscription = self
            .broker
            .subscribe(&self.route.input, &self.route.group)
            .await?;

        info!(
            stage,
            input = %self.route.input,
            output = %self.route.output,
            group = %self.route.group,
            "Stage started"
        );

        while !clock.expired() {
            let batch = subscription
                .poll(self.poll.timeout_within(&clock), self.poll.batch_size)
                .await?;

            for delivery in batch {
                stats.received += 1;

                match self.process(&delivery.payload).await {
                    Outcome::Publish(output) => match serde_json::to_vec(&output) {
                        Ok(payload) => {
                            self.broker.publish(&self.route.output, payload).await?;
                            stats.published += 1;
                            info!(stage, query_id = %output.query_id(), "Published to {}", self.route.output);
                        }
                        Err(e) => {
                            stats.dropped += 1;
                            warn!(stage, query_id = %output.query_id(), error = %StageError::Encode(e), "Dropping envelope");
                        }
                    },
                    Outcome::Drop { query_id, reason } => {
                        stats.dropped += 1;
                        warn!(
                            stage,
                            query_id = query_id.as_deref().unwrap_or("unknown"),
                            error = %reason,
                            "Dropping envelope"
                        );
                    }
                }

                subscription.ack(delivery).await?;
            }
        }

        debug!(stage, "Deadline reached");
        info!(stage, %stats, "Stage stopped");
        Ok(stats)
    }
}

fn peek_query_id(payload: &[u8]) -> Option<String> {
    serde_json::from_slice::<Envelope>(payload)
        .ok()
        .and_then(|envelope| envelope.query_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, TopicSpec};
    use crate::completion::CompletionError;
    use crate::envelope::NewQuery;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echoed {
        #[serde(flatten)]
        query: NewQuery,
        echo: String,
    }

    impl QueryRecord for Echoed {
        fn query_id(&self) -> &str {
            &self.query.query_id
        }
    }

    struct Echo;

    impl Transform for Echo {
        type Input = NewQuery;
        type Output = Echoed;

        fn name(&self) -> &'static str {
            "ECHO"
        }

        fn mode(&self) -> CompletionMode {
            CompletionMode::FreeText
        }

        fn prompt(&self, input: &NewQuery) -> Vec<Turn> {
            vec![Turn::user(input.customer_query.clone())]
        }

        fn apply(&self, input: NewQuery, completion: String) -> Result<Echoed, StageError> {
            Ok(Echoed {
                query: input,
                echo: completion,
            })
        }
    }

    /// Echoes the last turn, failing when it contains "fail"
    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            let content = request.turns.last().map(|t| t.content.clone()).unwrap_or_default();
            if content.contains("fail") {
                Err(CompletionError::Timeout)
            } else {
                Ok(content.to_uppercase())
            }
        }
    }

    fn query(id: &str, text: &str) -> Vec<u8> {
        serde_json::to_vec(&NewQuery {
            query_id: id.to_string(),
            customer_id: "CUST-1000".to_string(),
            customer_query: text.to_string(),
        })
        .unwrap()
    }

    async fn stage(broker: &MemoryBroker) -> TransformStage<Echo> {
        broker
            .ensure_topics(&[TopicSpec::new("in"), TopicSpec::new("out")])
            .await
            .unwrap();
        TransformStage::new(
            Echo,
            Route::new("in", "out", "echo-group"),
            Box::new(broker.clone()),
            Arc::new(EchoClient),
        )
        .with_poll_settings(PollSettings {
            timeout: Duration::from_millis(5),
            batch_size: 10,
        })
    }

    #[tokio::test]
    async fn test_process_success() {
        let broker = MemoryBroker::new();
        let stage = stage(&broker).await;

        match stage.process(&query("Q-1", "hello")).await {
            Outcome::Publish(out) => {
                assert_eq!(out.echo, "HELLO");
                assert_eq!(out.query.query_id, "Q-1");
            }
            Outcome::Drop { reason, .. } => panic!("unexpected drop: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_process_drops_on_completion_failure() {
        let broker = MemoryBroker::new();
        let stage = stage(&broker).await;

        match stage.process(&query("Q-2", "please fail")).await {
            Outcome::Drop { query_id, reason } => {
                assert_eq!(query_id.as_deref(), Some("Q-2"));
                assert!(matches!(reason, StageError::Completion(CompletionError::Timeout)));
            }
            Outcome::Publish(_) => panic!("expected drop"),
        }
    }

    #[tokio::test]
    async fn test_process_drops_record_missing_precondition() {
        let broker = MemoryBroker::new();
        let stage = stage(&broker).await;

        match stage.process(br#"{"query_id": "Q-3"}"#).await {
            Outcome::Drop { query_id, reason } => {
                assert_eq!(query_id.as_deref(), Some("Q-3"));
                assert!(matches!(reason, StageError::Decode(_)));
            }
            Outcome::Publish(_) => panic!("expected drop"),
        }
    }

    #[tokio::test]
    async fn test_run_publishes_successes_and_drops_failures() {
        let broker = MemoryBroker::new();
        let stage = stage(&broker).await;

        broker.publish("in", query("Q-1", "one")).await.unwrap();
        broker.publish("in", query("Q-2", "fail two")).await.unwrap();
        broker.publish("in", b"not json".to_vec()).await.unwrap();
        broker.publish("in", query("Q-4", "four")).await.unwrap();

        let stats = stage.run(Duration::from_millis(50)).await.unwrap();
        assert_eq!(
            stats,
            StageStats {
                received: 4,
                published: 2,
                dropped: 2
            }
        );

        let published: Vec<Echoed> = broker
            .messages("out")
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect();
        let ids: Vec<&str> = published.iter().map(|e| e.query.query_id.as_str()).collect();
        assert_eq!(ids, vec!["Q-1", "Q-4"]);
    }

    #[tokio::test]
    async fn test_run_fails_when_broker_goes_down() {
        let broker = MemoryBroker::new();
        let stage = stage(&broker).await;
        broker.set_unavailable(true);

        let err = stage.run(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }
}
