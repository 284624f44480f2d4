//! Core data model types for mcqforge.
//!
//! [`McqCandidate`] is the only thing the pipeline hands back to callers. It
//! can only be built by the validator, so holding one means every question
//! invariant has already been checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GenerationError;

/// JSON keys of the four options, in order.
pub const OPTION_KEYS: [&str; 4] = ["option1", "option2", "option3", "option4"];

/// A validated multiple-choice question.
///
/// Serializes as the flat [`McqRecord`] shape consumed by storage and HTTP
/// layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "McqRecord")]
pub struct McqCandidate {
    question: String,
    answer: String,
    options: [String; 4],
}

impl McqCandidate {
    /// Only the validator constructs candidates.
    pub(crate) fn new(question: String, answer: String, options: [String; 4]) -> Self {
        Self {
            question,
            answer,
            options,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn options(&self) -> &[String; 4] {
        &self.options
    }

    /// Zero-based index of the option equal to the answer.
    pub fn answer_index(&self) -> usize {
        self.options
            .iter()
            .position(|o| *o == self.answer)
            .unwrap_or_default()
    }

    /// Convert into the flat record shape.
    pub fn into_record(self) -> McqRecord {
        self.into()
    }
}

/// Plain record of the six text fields of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McqRecord {
    pub question: String,
    pub answer: String,
    pub option1: String,
    pub option2: String,
    pub option3: String,
    pub option4: String,
}

impl From<McqCandidate> for McqRecord {
    fn from(candidate: McqCandidate) -> Self {
        let [option1, option2, option3, option4] = candidate.options;
        Self {
            question: candidate.question,
            answer: candidate.answer,
            option1,
            option2,
            option3,
            option4,
        }
    }
}

/// How the orchestrator asks the model for questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One JSON object per model call.
    #[default]
    Single,
    /// One JSON array of the remaining count per model call.
    Batch,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Single => write!(f, "single"),
            Strategy::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "one" => Ok(Strategy::Single),
            "batch" | "array" => Ok(Strategy::Batch),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// One invocation of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Subject the questions should cover (e.g. "past simple tense").
    pub topic: String,
    /// How many questions the caller wants.
    pub count: usize,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>, count: usize) -> Self {
        Self {
            topic: topic.into(),
            count,
        }
    }

    /// Check the request against the application's count policy.
    pub fn validate(&self, max_count: usize) -> Result<(), GenerationError> {
        if self.topic.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("topic is empty".into()));
        }
        if self.count == 0 || self.count > max_count {
            return Err(GenerationError::InvalidRequest(format!(
                "count must be between 1 and {max_count}, got {}",
                self.count
            )));
        }
        Ok(())
    }
}
