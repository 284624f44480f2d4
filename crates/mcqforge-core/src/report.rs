//! Generation report with JSON persistence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{McqCandidate, Strategy};
use crate::validator::Rejection;

/// Why one attempt (or one batch element) produced no question.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum AttemptFailure {
    /// The engine call itself failed or timed out.
    #[error("inference failed: {0}")]
    Inference(String),

    /// No balanced JSON region could be extracted.
    #[error("no balanced JSON fragment in response")]
    NoFragment,

    /// A fragment was found but did not parse.
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// The candidate parsed but broke a question invariant.
    #[error(transparent)]
    Validation(Rejection),
}

/// A failure tagged with the attempt it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionRecord {
    pub attempt: u32,
    pub failure: AttemptFailure,
}

/// Outcome of one `generate` call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    /// Unique run identifier.
    pub id: Uuid,
    /// When the run finished.
    pub created_at: DateTime<Utc>,
    pub topic: String,
    /// Number of questions asked for.
    pub requested: usize,
    pub strategy: Strategy,
    /// Engine that served the run.
    pub engine: String,
    /// Model calls made (rounds, for the batch strategy).
    pub attempts: u32,
    /// Retry budget for this run.
    pub max_attempts: u32,
    /// Accepted questions, in acceptance order.
    pub questions: Vec<McqCandidate>,
    /// Everything that was thrown away, for diagnostics.
    pub rejections: Vec<RejectionRecord>,
    /// `true` when the budget ran out before `requested` was reached.
    pub budget_exhausted: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl GenerationReport {
    /// Whether the full requested count was produced.
    pub fn is_complete(&self) -> bool {
        self.questions.len() == self.requested
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }
}
