//! The three LLM-backed stages: classify, respond, review.

use super::transform::{CompletionMode, Transform};
use crate::completion::{parse_structured, Turn};
use crate::envelope::{
    Classification, ClassifiedQuery, NewQuery, QualityReview, RespondedQuery, ReviewedQuery,
};
use crate::error::StageError;

pub const CLASSIFIER_STAGE: &str = "INTENT";
pub const RESPONDER_STAGE: &str = "RESPONSE";
pub const REVIEWER_STAGE: &str = "QUALITY";

pub const CLASSIFIER_GROUP: &str = "intent-group";
pub const RESPONDER_GROUP: &str = "response-group";
pub const REVIEWER_GROUP: &str = "quality-group";

const SUPPORT_PERSONA: &str = "You are helpful support.";

/// Assigns a category and priority to a new query.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Transform for Classifier {
    type Input = NewQuery;
    type Output = ClassifiedQuery;

    fn name(&self) -> &'static str {
        CLASSIFIER_STAGE
    }

    fn mode(&self) -> CompletionMode {
        CompletionMode::Structured
    }

    // JSON mode requires the word "JSON" to appear in the prompt
    fn prompt(&self, input: &NewQuery) -> Vec<Turn> {
        vec![Turn::user(format!(
            "Classify this query category and priority. Respond in JSON format: {}",
            input.customer_query
        ))]
    }

    fn apply(&self, input: NewQuery, completion: String) -> Result<ClassifiedQuery, StageError> {
        let classification: Classification =
            parse_structured(&completion).map_err(|e| StageError::Parse(e.to_string()))?;

        Ok(ClassifiedQuery {
            query: input,
            classification,
        })
    }
}

/// Drafts a free-text reply to a classified query.
#[derive(Debug, Clone, Copy, Default)]
pub struct Responder;

impl Transform for Responder {
    type Input = ClassifiedQuery;
    type Output = RespondedQuery;

    fn name(&self) -> &'static str {
        RESPONDER_STAGE
    }

    fn mode(&self) -> CompletionMode {
        CompletionMode::FreeText
    }

    fn prompt(&self, input: &ClassifiedQuery) -> Vec<Turn> {
        vec![
            Turn::system(SUPPORT_PERSONA),
            Turn::user(format!("Query: {}", input.query.customer_query)),
        ]
    }

    fn apply(&self, input: ClassifiedQuery, completion: String) -> Result<RespondedQuery, StageError> {
        let response = completion.trim();
        if response.is_empty() {
            return Err(StageError::EmptyCompletion);
        }

        Ok(RespondedQuery {
            classified: input,
            generated_response: response.to_string(),
        })
    }
}

/// Scores a drafted reply and decides whether it is approved.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reviewer;

impl Transform for Reviewer {
    type Input = RespondedQuery;
    type Output = ReviewedQuery;

    fn name(&self) -> &'static str {
        REVIEWER_STAGE
    }

    fn mode(&self) -> CompletionMode {
        CompletionMode::Structured
    }

    fn prompt(&self, input: &RespondedQuery) -> Vec<Turn> {
        vec![Turn::user(format!(
            "Review this response: {}. Score 1-5 and 'approved' true/false. Provide the result in JSON.",
            input.generated_response
        ))]
    }

    fn apply(&self, input: RespondedQuery, completion: String) -> Result<ReviewedQuery, StageError> {
        let quality_review: QualityReview =
            parse_structured(&completion).map_err(|e| StageError::Parse(e.to_string()))?;

        Ok(ReviewedQuery {
            responded: input,
            quality_review,
        })
    }
}
