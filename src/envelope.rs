//! Message envelope passed between pipeline stages
//!
//! Each stage reads the record it requires and writes the next one. Records
//! flatten the previous stage's record, so the wire format stays a single JSON
//! object that only ever gains fields.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Example queries the source stage cycles through
pub const QUERY_CATALOG: [&str; 4] = [
    "I can't log into my account",
    "Refund policy?",
    "Order #12345 status",
    "Double charged",
];

/// A freshly received customer query, as published by the source stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuery {
    /// Unique per envelope
    pub query_id: String,

    pub customer_id: String,

    pub customer_query: String,
}

/// Category and priority assigned by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,

    #[serde(deserialize_with = "string_or_number")]
    pub priority: String,

    /// Any additional keys returned by the completion service
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Verdict assigned by the reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReview {
    /// Usually 1-5; fractional and quoted scores are accepted
    #[serde(deserialize_with = "numeric_score")]
    pub score: f64,

    pub approved: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedQuery {
    #[serde(flatten)]
    pub query: NewQuery,

    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondedQuery {
    #[serde(flatten)]
    pub classified: ClassifiedQuery,

    pub generated_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedQuery {
    #[serde(flatten)]
    pub responded: RespondedQuery,

    pub quality_review: QualityReview,
}

/// A typed envelope record that carries its query id
pub trait QueryRecord {
    fn query_id(&self) -> &str;
}

impl QueryRecord for NewQuery {
    fn query_id(&self) -> &str {
        &self.query_id
    }
}

impl QueryRecord for ClassifiedQuery {
    fn query_id(&self) -> &str {
        self.query.query_id()
    }
}

impl QueryRecord for RespondedQuery {
    fn query_id(&self) -> &str {
        self.classified.query_id()
    }
}

impl QueryRecord for ReviewedQuery {
    fn query_id(&self) -> &str {
        self.responded.query_id()
    }
}

/// Which stage an envelope has most recently passed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Received,
    Classified,
    Responded,
    Reviewed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Received => write!(f, "received"),
            PipelineStage::Classified => write!(f, "classified"),
            PipelineStage::Responded => write!(f, "responded"),
            PipelineStage::Reviewed => write!(f, "reviewed"),
        }
    }
}

/// Loosely typed view of an envelope at any point in the pipeline
///
/// Used where a stage must tolerate missing fields (the sink) or only needs to
/// inspect a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub query_id: Option<String>,

    pub customer_id: Option<String>,

    pub customer_query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_response: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_review: Option<Value>,
}

impl Envelope {
    /// Position in the pipeline, derived from which optional fields are present
    pub fn stage(&self) -> PipelineStage {
        if self.quality_review.is_some() {
            PipelineStage::Reviewed
        } else if self.generated_response.is_some() {
            PipelineStage::Responded
        } else if self.classification.is_some() {
            PipelineStage::Classified
        } else {
            PipelineStage::Received
        }
    }

    /// Approval verdict, if the reviewer recorded one
    pub fn approved(&self) -> Option<bool> {
        self.quality_review
            .as_ref()
            .and_then(|review| review.get("approved"))
            .and_then(Value::as_bool)
    }
}

/// Produces unique query ids and derived customer ids for one run
///
/// Ids combine a coarse unix timestamp with a monotonic counter, so they stay
/// unique even when several envelopes are created within the same second.
#[derive(Debug, Default)]
pub struct QueryIdGenerator {
    count: u64,
}

impl QueryIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next envelope, drawing the query round-robin from `catalog`
    pub fn next_query<S: AsRef<str>>(&mut self, catalog: &[S]) -> NewQuery {
        let count = self.count;
        self.count += 1;

        let customer_query = if catalog.is_empty() {
            String::new()
        } else {
            catalog[(count as usize) % catalog.len()].as_ref().to_string()
        };

        NewQuery {
            query_id: format!("Q-{}-{}", Utc::now().timestamp(), count),
            customer_id: format!("CUST-{}", 1000 + count),
            customer_query,
        }
    }

    /// Number of envelopes generated so far
    pub fn generated(&self) -> u64 {
        self.count
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn numeric_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .filter(|score: &f64| score.is_finite())
        .ok_or_else(|| serde::de::Error::custom("expected a numeric score"))
}
