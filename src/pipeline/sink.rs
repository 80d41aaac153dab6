//! Sink stage: renders completed envelopes from the final topic.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{PollSettings, RunClock, StageStats};
use crate::broker::Broker;
use crate::envelope::Envelope;
use crate::error::BrokerError;

pub const SINK_STAGE: &str = "DASHBOARD";
pub const SINK_GROUP: &str = "dashboard-group";

/// What the sink shows for one completed envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalView {
    pub query_id: Option<String>,
    pub response: Option<String>,
    pub approved: Option<bool>,
}

impl From<&Envelope> for FinalView {
    fn from(envelope: &Envelope) -> Self {
        Self {
            query_id: envelope.query_id.clone(),
            response: envelope.generated_response.clone(),
            approved: envelope.approved(),
        }
    }
}

impl fmt::Display for FinalView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let approved = match self.approved {
            Some(true) => "true",
            Some(false) => "false",
            None => "unknown",
        };

        writeln!(f, "--- FINAL OUTPUT ---")?;
        writeln!(f, "ID: {}", self.query_id.as_deref().unwrap_or("unknown"))?;
        writeln!(f, "Response: {}", self.response.as_deref().unwrap_or("unknown"))?;
        writeln!(f, "Approved: {}", approved)?;
        write!(f, "--------------------")
    }
}

/// Receives each completed envelope the sink observes.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &FinalView);
}

/// Prints each envelope to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleRenderer;

impl Renderer for ConsoleRenderer {
    fn render(&self, view: &FinalView) {
        println!("\n{}", view);
    }
}

/// Polls the final topic and renders what arrives; never publishes.
pub struct SinkStage {
    topic: String,
    broker: Box<dyn Broker>,
    renderer: Arc<dyn Renderer>,
    poll: PollSettings,
}

impl SinkStage {
    pub fn new(topic: impl Into<String>, broker: Box<dyn Broker>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            topic: topic.into(),
            broker,
            renderer,
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub async fn run(self, duration: Duration) -> Result<StageStats, BrokerError> {
        let clock = RunClock::start(duration);
        let mut stats = StageStats::default();
        let mut subscription = self.broker.subscribe(&self.topic, SINK_GROUP).await?;

        info!(stage = SINK_STAGE, topic = %self.topic, "Stage started");

        while !clock.expired() {
            let batch = subscription
                .poll(self.poll.timeout_within(&clock), self.poll.batch_size)
                .await?;

            for delivery in batch {
                stats.received += 1;

                match serde_json::from_slice::<Envelope>(&delivery.payload) {
                    Ok(envelope) => {
                        if envelope.quality_review.is_none() {
                            warn!(
                                stage = SINK_STAGE,
                                query_id = envelope.query_id.as_deref().unwrap_or("unknown"),
                                "Envelope reached sink without a quality review"
                            );
                        }
                        self.renderer.render(&FinalView::from(&envelope));
                    }
                    Err(e) => {
                        stats.dropped += 1;
                        warn!(stage = SINK_STAGE, error = %e, "Undecodable envelope");
                    }
                }

                subscription.ack(delivery).await?;
            }
        }

        info!(stage = SINK_STAGE, %stats, "Stage stopped");
        Ok(stats)
    }
}
