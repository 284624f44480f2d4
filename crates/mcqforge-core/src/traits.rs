//! Core trait definitions for inference engines.
//!
//! Implemented by the `mcqforge-providers` crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inference engine trait
// ---------------------------------------------------------------------------

/// A locally hosted text-generation backend.
///
/// Engines are not assumed to be reentrant: [`crate::invoker::ModelHandle`]
/// guarantees that `run` is never called concurrently on the same engine.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Human-readable engine name (e.g. "ollama").
    fn name(&self) -> &str;

    /// Make sure the model is loaded and ready.
    ///
    /// Called exactly once, when the handle is constructed. Any error here is
    /// reported as [`crate::error::GenerationError::ModelUnavailable`].
    async fn load(&self) -> anyhow::Result<()>;

    /// Generate text for a prompt.
    async fn run(&self, request: &InferenceRequest) -> anyhow::Result<String>;
}

/// Shared engines, so callers can keep a reference for inspection.
#[async_trait]
impl<T: InferenceEngine + ?Sized> InferenceEngine for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn load(&self) -> anyhow::Result<()> {
        (**self).load().await
    }

    async fn run(&self, request: &InferenceRequest) -> anyhow::Result<String> {
        (**self).run(request).await
    }
}

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Full prompt text.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling parameters.
    pub sampling: SamplingParams,
}

/// Sampling knobs passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
}

// ---------------------------------------------------------------------------
// Generation policy
// ---------------------------------------------------------------------------

/// Fixed sampling policy. Not caller-configurable so cached output stays
/// comparable across requests.
pub const SAMPLING: SamplingParams = SamplingParams {
    temperature: 0.7,
    top_p: 0.8,
    top_k: 20,
};

/// Token budget for the one-question prompt.
pub const SINGLE_MAX_TOKENS: u32 = 512;

/// Token budget for the batch prompt.
pub const BATCH_MAX_TOKENS: u32 = 2048;
