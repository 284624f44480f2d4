//! Scripted engine for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use mcqforge_core::traits::{InferenceEngine, InferenceRequest};

/// An engine that replays canned responses instead of running a model.
///
/// Responses are returned in order; once the script runs out the default
/// response is repeated forever.
pub struct MockEngine {
    /// Responses still to be played.
    script: Mutex<VecDeque<String>>,
    /// Response once the script is exhausted.
    default_response: String,
    /// Error returned from `load`, if any.
    load_error: Option<String>,
    /// Number of `run` calls made.
    call_count: AtomicU32,
    /// Last request received.
    last_request: Mutex<Option<InferenceRequest>>,
}

impl MockEngine {
    /// Create a mock that plays `responses` in order, then repeats the last.
    pub fn with_script(responses: Vec<String>) -> Self {
        let default_response = responses.last().cloned().unwrap_or_default();
        Self {
            script: Mutex::new(responses.into()),
            default_response,
            load_error: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn with_fixed_response(response: &str) -> Self {
        Self::with_script(vec![response.to_string()])
    }

    /// Create a mock whose model never loads.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            load_error: Some(reason.to_string()),
            ..Self::with_script(vec![])
        }
    }

    /// Get the number of calls made to this engine.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last request made to this engine.
    pub fn last_request(&self) -> Option<InferenceRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn load(&self) -> anyhow::Result<()> {
        match &self.load_error {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }

    async fn run(&self, request: &InferenceRequest) -> anyhow::Result<String> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock().unwrap() = Some(request.clone());

        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }
}
