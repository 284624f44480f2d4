//! Serialized access to the inference engine.
//!
//! A [`ModelHandle`] owns the engine and the prompt cache behind one async
//! mutex, so at most one inference call is in flight per handle no matter how
//! many generation requests share it. [`ModelInvoker`] is the cheap, cloneable
//! front end the orchestrator talks to.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::cache::{CacheStats, PromptCache};
use crate::error::{GenerationError, ProviderError};
use crate::traits::{InferenceEngine, InferenceRequest, SAMPLING};

struct HandleState {
    engine: Box<dyn InferenceEngine>,
    cache: PromptCache,
}

/// The loaded model plus its output cache.
///
/// Constructed once at startup and shared by reference (usually an `Arc`).
/// Dropping the handle releases the engine.
pub struct ModelHandle {
    engine_name: String,
    state: Mutex<HandleState>,
}

impl ModelHandle {
    /// Load the engine and wrap it.
    ///
    /// This is the only place the engine's `load` is called; a failure here is
    /// fatal and never retried.
    pub async fn open(
        engine: Box<dyn InferenceEngine>,
        cache_capacity: usize,
    ) -> Result<Self, GenerationError> {
        let engine_name = engine.name().to_string();
        engine
            .load()
            .await
            .map_err(|e| GenerationError::ModelUnavailable(format!("{engine_name}: {e:#}")))?;

        info!(engine = %engine_name, cache_capacity, "model handle ready");

        Ok(Self {
            engine_name,
            state: Mutex::new(HandleState {
                engine,
                cache: PromptCache::new(cache_capacity),
            }),
        })
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.state.lock().await.cache.stats()
    }
}

/// Whether a call may be answered from the prompt cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Return cached output for an identical prompt if there is any.
    #[default]
    Use,
    /// Always run the model, then overwrite the cached output.
    Refresh,
}

/// Turns prompts into raw model text through a shared [`ModelHandle`].
#[derive(Clone)]
pub struct ModelInvoker {
    handle: Arc<ModelHandle>,
    attempt_timeout: Option<Duration>,
}

impl ModelInvoker {
    pub fn new(handle: Arc<ModelHandle>) -> Self {
        Self {
            handle,
            attempt_timeout: None,
        }
    }

    /// Bound every inference call by a wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Run a prompt and return the raw (trimmed) text.
    pub async fn invoke(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String> {
        self.invoke_with(prompt, max_tokens, CachePolicy::Use, |raw| {
            Verdict::Keep(raw.to_string())
        })
        .await
    }

    /// Run a prompt and let `judge` decide, before the handle is released,
    /// whether the raw text may stay cached.
    ///
    /// Output judged [`Verdict::Discard`] is never visible to another caller:
    /// a fresh reply is not stored, and a cached one is removed. Engine errors
    /// (including [`ProviderError::Timeout`] when the attempt limit is hit) are
    /// returned unchanged; nothing is cached for them.
    #[instrument(skip(self, prompt, judge), fields(engine = %self.handle.engine_name))]
    pub async fn invoke_with<T, F>(
        &self,
        prompt: &str,
        max_tokens: u32,
        policy: CachePolicy,
        judge: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(&str) -> Verdict<T> + Send,
    {
        let mut state = self.handle.state.lock().await;

        if policy == CachePolicy::Use {
            if let Some(raw) = state.cache.get(prompt) {
                debug!("prompt cache hit");
                return Ok(match judge(&raw) {
                    Verdict::Keep(out) => out,
                    Verdict::Discard(out) => {
                        state.cache.invalidate(prompt);
                        out
                    }
                });
            }
        }

        let request = InferenceRequest {
            prompt: prompt.to_string(),
            max_tokens,
            sampling: SAMPLING,
        };

        let run = state.engine.run(&request);
        let raw = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| ProviderError::Timeout(limit.as_secs()))??,
            None => run.await?,
        };
        let raw = raw.trim().to_string();
        debug!(raw = %raw, "model output");

        Ok(match judge(&raw) {
            Verdict::Keep(out) => {
                state.cache.insert(prompt.to_string(), raw);
                out
            }
            Verdict::Discard(out) => out,
        })
    }
}

/// A caller's judgement of raw model output, carrying whatever it derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    /// Usable; cache the raw text.
    Keep(T),
    /// Rejected; keep it out of the cache.
    Discard(T),
}
