//! Orchestrator: provisions topics, then runs all five stages to completion.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use tracing::{error, info};

use super::sink::{ConsoleRenderer, Renderer, SinkStage, SINK_STAGE};
use super::source::{SourceStage, SOURCE_STAGE};
use super::stages::{
    Classifier, Responder, Reviewer, CLASSIFIER_GROUP, RESPONDER_GROUP, REVIEWER_GROUP,
};
use super::topics::ensure_topics;
use super::transform::{Route, Transform, TransformStage};
use super::{PollSettings, StageStats};
use crate::broker::{Broker, BrokerConnector};
use crate::completion::CompletionClient;
use crate::config::PipelineConfig;
use crate::error::{BrokerError, PipelineError, Result};

type StageResult = std::result::Result<StageStats, BrokerError>;

/// Stage tasks plus the name each task id belongs to, so a panic can still be
/// attributed to its stage.
#[derive(Default)]
struct StageSet {
    tasks: JoinSet<StageResult>,
    names: HashMap<task::Id, &'static str>,
}

impl StageSet {
    fn spawn<F>(&mut self, stage: &'static str, run: F)
    where
        F: Future<Output = StageResult> + Send + 'static,
    {
        let handle = self.tasks.spawn(run);
        self.names.insert(handle.id(), stage);
    }

    fn name(&self, id: task::Id) -> &'static str {
        self.names.get(&id).copied().unwrap_or("unknown")
    }
}

/// Wires the stages together and supervises one run.
///
/// Every stage gets its own broker connection from the connector. The
/// completion client is shared.
pub struct Orchestrator {
    config: PipelineConfig,
    connector: Arc<dyn BrokerConnector>,
    completion: Arc<dyn CompletionClient>,
    renderer: Arc<dyn Renderer>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        connector: Arc<dyn BrokerConnector>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            config,
            connector,
            completion,
            renderer: Arc::new(ConsoleRenderer),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Provision topics, run every stage for `duration`, and wait for all.
    ///
    /// Provisioning and connection failures abort before any stage starts.
    /// A stage that fails or panics makes the run fail, but only after every
    /// other stage has reached its own deadline.
    pub async fn run_system(&self, duration: Duration) -> Result<()> {
        {
            let admin = self
                .connector
                .connect()
                .await
                .map_err(PipelineError::Provisioning)?;
            ensure_topics(admin.as_ref(), &self.config.topics)
                .await
                .map_err(PipelineError::Provisioning)?;
        }

        let topics = &self.config.topics;
        let poll = PollSettings {
            timeout: self.config.poll_timeout(),
            batch_size: self.config.batch_size,
        };

        let source = SourceStage::new(
            topics.entry.clone(),
            self.connect(SOURCE_STAGE).await?,
            self.config.source_interval(),
        );
        let classifier = self
            .transform_stage(
                Classifier,
                Route::new(&topics.entry, &topics.classification, CLASSIFIER_GROUP),
                poll,
            )
            .await?;
        let responder = self
            .transform_stage(
                Responder,
                Route::new(&topics.classification, &topics.response, RESPONDER_GROUP),
                poll,
            )
            .await?;
        let reviewer = self
            .transform_stage(
                Reviewer,
                Route::new(&topics.response, &topics.final_, REVIEWER_GROUP),
                poll,
            )
            .await?;
        let sink = SinkStage::new(
            topics.final_.clone(),
            self.connect(SINK_STAGE).await?,
            self.renderer.clone(),
        )
        .with_poll_settings(poll);

        info!(?duration, "Starting pipeline stages");

        let mut stages = StageSet::default();
        stages.spawn(SOURCE_STAGE, source.run(duration));
        stages.spawn(Classifier.name(), classifier.run(duration));
        stages.spawn(Responder.name(), responder.run(duration));
        stages.spawn(Reviewer.name(), reviewer.run(duration));
        stages.spawn(SINK_STAGE, sink.run(duration));

        info!("Spawned {} stage tasks", stages.tasks.len());

        // Wait for every stage; keep the first failure observed
        let mut failure = None;
        while let Some(joined) = stages.tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((id, Ok(stats))) => {
                    info!(stage = stages.name(id), %stats, "Stage finished");
                    continue;
                }
                Ok((id, Err(source))) => {
                    let stage = stages.name(id);
                    error!(stage, error = %source, "Stage failed");
                    PipelineError::StageFailed { stage, source }
                }
                Err(join_error) => {
                    let stage = stages.name(join_error.id());
                    error!(stage, error = %join_error, "Stage panicked");
                    PipelineError::StagePanicked { stage }
                }
            };
            if failure.is_none() {
                failure = Some(outcome);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => {
                info!("Pipeline run complete");
                Ok(())
            }
        }
    }

    async fn connect(&self, stage: &'static str) -> Result<Box<dyn Broker>> {
        self.connector
            .connect()
            .await
            .map_err(|source| PipelineError::Connect { stage, source })
    }

    async fn transform_stage<T: Transform>(
        &self,
        transform: T,
        route: Route,
        poll: PollSettings,
    ) -> Result<TransformStage<T>> {
        let broker = self.connect(transform.name()).await?;
        Ok(TransformStage::new(transform, route, broker, self.completion.clone()).with_poll_settings(poll))
    }
}
