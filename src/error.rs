//! Error types for the query pipeline.
//!
//! Errors fall into two groups. [`StageError`] is per-message and
//! recoverable: the stage drops the envelope and keeps polling. Everything
//! else ends up in [`PipelineError`], which is fatal for the run.

use thiserror::Error;

use crate::completion::CompletionError;

/// Errors raised by a broker connection.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker could not be reached or the connection was lost.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected a topic operation.
    #[error("topic '{topic}': {reason}")]
    Topic { topic: String, reason: String },

    /// A topic was used before it was provisioned.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Publishing a message failed.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Fetching or acknowledging messages failed.
    #[error("subscription on '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },
}

impl BrokerError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        BrokerError::Unavailable(err.to_string())
    }

    pub(crate) fn topic(topic: &str, err: impl std::fmt::Display) -> Self {
        BrokerError::Topic {
            topic: topic.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn publish(topic: &str, err: impl std::fmt::Display) -> Self {
        BrokerError::Publish {
            topic: topic.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn subscription(topic: &str, err: impl std::fmt::Display) -> Self {
        BrokerError::Subscription {
            topic: topic.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Why a single envelope was dropped by a stage.
#[derive(Error, Debug)]
pub enum StageError {
    /// The payload did not decode into the record this stage requires.
    #[error("undecodable envelope: {0}")]
    Decode(#[source] serde_json::Error),

    /// The completion service failed.
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    /// The completion did not parse into the expected structured result.
    #[error("unparseable structured result: {0}")]
    Parse(String),

    /// The completion parsed but carried no usable content.
    #[error("empty completion")]
    EmptyCompletion,

    /// The output record could not be serialized.
    #[error("unencodable envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Configuration errors, all raised before any stage starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing credential: set {0}")]
    MissingCredential(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Fatal errors that abort or fail a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("completion client setup failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("topic provisioning failed: {0}")]
    Provisioning(#[source] BrokerError),

    #[error("stage {stage} could not connect: {source}")]
    Connect {
        stage: &'static str,
        #[source]
        source: BrokerError,
    },

    #[error("stage {stage} failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: BrokerError,
    },

    #[error("stage {stage} panicked")]
    StagePanicked { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::publish("final-responses", "connection reset");
        assert_eq!(
            err.to_string(),
            "publish to 'final-responses' failed: connection reset"
        );
    }

    #[test]
    fn test_stage_failed_display() {
        let err = PipelineError::StageFailed {
            stage: "INTENT",
            source: BrokerError::Unavailable("closed".into()),
        };
        assert_eq!(err.to_string(), "stage INTENT failed: broker unavailable: closed");
    }

    #[test]
    fn test_missing_credential_display() {
        let err = PipelineError::from(ConfigError::MissingCredential("OPENAI_API_KEY".into()));
        assert_eq!(err.to_string(), "missing credential: set OPENAI_API_KEY");
    }

    #[test]
    fn test_completion_setup_error_converts() {
        fn build() -> Result<()> {
            Err::<(), _>(CompletionError::Timeout)?;
            Ok(())
        }
        let err = build().unwrap_err();
        assert!(matches!(err, PipelineError::Completion(CompletionError::Timeout)));
        assert!(err.to_string().starts_with("completion client setup failed"));
    }
}
