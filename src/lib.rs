//! # Querystream: Multi-Stage Customer Query Pipeline
//!
//! Querystream runs a chain of independent worker stages that talk to each
//! other only through broker topics. Each envelope gains one field per stage:
//!
//! ```text
//! Source ──customer-queries──▶ Classifier ──intent-classification──▶ Responder
//!        ──response-generation──▶ Reviewer ──final-responses──▶ Sink
//! ```
//!
//! ## Features
//!
//! - **Typed envelopes**: each stage deserializes exactly the record it needs,
//!   so a missing upstream field is a decode failure, not a runtime surprise
//! - **Pluggable broker**: NATS JetStream in production, an in-memory broker
//!   for tests, both behind the [`Broker`] trait
//! - **Pluggable completion service**: any OpenAI-compatible endpoint, behind
//!   the [`CompletionClient`] trait
//! - **Drop-on-failure**: a message whose completion fails is logged, acked
//!   and discarded; the stage keeps running
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use querystream::{MemoryBroker, Orchestrator, PipelineConfig};
//!
//! let orchestrator = Orchestrator::new(
//!     PipelineConfig::default(),
//!     Arc::new(MemoryBroker::new()),
//!     Arc::new(my_completion_client),
//! );
//! orchestrator.run_system(Duration::from_secs(120)).await?;
//! ```

// Core modules
pub mod envelope;
pub mod error;
pub mod config;

// External collaborator boundaries
pub mod broker;
pub mod completion;

// NATS JetStream integration
pub mod nats;

// Stages and orchestration
pub mod pipeline;

// Re-export key types
pub use envelope::{
    Classification, ClassifiedQuery, Envelope, NewQuery, PipelineStage, QualityReview,
    QueryIdGenerator, QueryRecord, RespondedQuery, ReviewedQuery,
};
pub use error::{BrokerError, ConfigError, PipelineError, StageError};
pub use config::{PipelineConfig, TopicNames};

pub use broker::{Broker, BrokerConnector, Delivery, MemoryBroker, Subscription, TopicSpec};
pub use completion::{
    CompletionClient, CompletionError, CompletionRequest, OpenAiClient, OpenAiConfig, Turn,
};

pub use nats::{NatsClient, NatsConfig};

pub use pipeline::{
    Classifier, CompletionMode, ConsoleRenderer, FinalView, Orchestrator, Outcome, Renderer,
    Responder, Reviewer, Route, SinkStage, SourceStage, StageStats, Transform, TransformStage,
};
