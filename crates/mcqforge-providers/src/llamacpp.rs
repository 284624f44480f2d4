//! llama.cpp server engine, via its OpenAI-compatible completions API.
//!
//! Works with `llama-server` and other local servers that speak
//! `/v1/completions` and accept `top_k` as an extension field.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mcqforge_core::error::ProviderError;
use mcqforge_core::traits::{InferenceEngine, InferenceRequest};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// llama.cpp (`llama-server`) inference engine.
pub struct LlamaCppEngine {
    base_url: String,
    model: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlamaCppEngine {
    pub fn new(
        base_url: &str,
        model: Option<String>,
        api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    fn send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(DEFAULT_TIMEOUT_SECS)
        } else if e.is_connect() {
            ProviderError::NetworkError(format!(
                "llama.cpp server not reachable at {}. Start it with: llama-server -m <model.gguf>",
                self.base_url
            ))
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: CompletionUsage,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Deserialize, Default)]
struct CompletionUsage {
    #[serde(default)]
    completion_tokens: u32,
}

/// `Retry-After` seconds as milliseconds; defaults to one second.
fn retry_after_ms(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(1)
        .saturating_mul(1000)
}

#[async_trait]
impl InferenceEngine for LlamaCppEngine {
    fn name(&self) -> &str {
        "llamacpp"
    }

    #[instrument(skip(self))]
    async fn load(&self) -> anyhow::Result<()> {
        let response = self
            .with_auth(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        match response.status().as_u16() {
            200 => Ok(()),
            401 => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::AuthenticationFailed(body).into())
            }
            503 => Err(ProviderError::ApiError {
                status: 503,
                message: "model is still loading".into(),
            }
            .into()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::ApiError {
                    status,
                    message: body,
                }
                .into())
            }
        }
    }

    #[instrument(skip(self, request), fields(max_tokens = request.max_tokens))]
    async fn run(&self, request: &InferenceRequest) -> anyhow::Result<String> {
        let start = Instant::now();

        let body = CompletionRequest {
            model: self.model.as_deref(),
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            top_k: request.sampling.top_k,
            stream: false,
        };

        let response = self
            .with_auth(
                self.client
                    .post(format!("{}/v1/completions", self.base_url))
                    .header("content-type", "application/json"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok());
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after_ms(retry_after),
            }
            .into());
        }
        if status == 401 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::AuthenticationFailed(body).into());
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status,
                message: body,
            }
            .into());
        }

        let api_response: CompletionResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status: 0,
                message: format!("failed to parse response: {e}"),
            })?;

        tracing::debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            tokens = api_response.usage.completion_tokens,
            "llama.cpp completion finished"
        );

        Ok(api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .unwrap_or_default())
    }
}
