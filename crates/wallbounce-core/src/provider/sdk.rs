//! In-process SDK provider adapter.
//!
//! Talks to an OpenAI-compatible chat completions endpoint in-process via
//! HTTP. Credentials come from an injected [`SecretStore`], never from
//! environment variables. Rate-limited requests are retried with jittered
//! exponential backoff inside the invocation's deadline budget.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    HealthStatus, InvocationContext, Provider, ProviderDescriptor, ProviderOutput, TokenUsage,
};
use crate::error::ProviderError;
use crate::safety::redact_secrets;

/// Credential source injected into SDK adapters.
pub trait SecretStore: Send + Sync {
    /// Fetch the secret stored under `name`.
    fn get(&self, name: &str) -> Option<String>;
}

/// Fixed in-memory secret store, loaded at startup.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    /// Build from pre-loaded `(name, value)` pairs.
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    /// Insert one secret.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.secrets.get(name).cloned()
    }
}

/// Retries attempted on rate-limited requests.
const MAX_RETRIES: u32 = 3;

/// Base backoff before jitter.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Provider adapter over an OpenAI-compatible chat completions API.
#[derive(Debug)]
pub struct SdkProvider {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl SdkProvider {
    /// Create an adapter, resolving the API key from the secret store.
    pub fn new(
        descriptor: ProviderDescriptor,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_secret: &str,
        secrets: &dyn SecretStore,
    ) -> Result<Self, ProviderError> {
        let api_key = secrets
            .get(api_key_secret)
            .ok_or_else(|| ProviderError::MissingCredential {
                secret: api_key_secret.to_string(),
            })?;
        Ok(Self {
            descriptor,
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<ProviderOutput, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                return Err(ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::Api {
                status,
                message: redact_secrets(&message),
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("response carried no choices".into()))?;

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        });

        tracing::debug!(
            provider = %self.descriptor.id,
            model = %self.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            chars = content.len(),
            "SDK provider response"
        );

        Ok(ProviderOutput {
            content,
            confidence: None,
            reasoning: None,
            usage,
        })
    }
}

/// Jittered exponential backoff for the given attempt (0-based).
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter)
}

#[async_trait::async_trait]
impl Provider for SdkProvider {
    fn describe(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        query: &str,
        ctx: &InvocationContext,
    ) -> Result<ProviderOutput, ProviderError> {
        let prompt = ctx.full_prompt(query);
        let deadline = Instant::now() + ctx.timeout;

        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProviderError::Timeout {
                    seconds: ctx.timeout.as_secs(),
                });
            }

            let result = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => return Err(ProviderError::Canceled),
                () = tokio::time::sleep(remaining) => {
                    return Err(ProviderError::Timeout { seconds: ctx.timeout.as_secs() });
                }
                result = self.complete(&prompt, 1024) => result,
            };

            match result {
                Err(ProviderError::RateLimited { retry_after_secs }) if attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt).max(Duration::from_secs(retry_after_secs));
                    if Instant::now() + delay >= deadline {
                        return Err(ProviderError::RateLimited { retry_after_secs });
                    }
                    tracing::debug!(
                        provider = %self.descriptor.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::select! {
                        biased;
                        () = ctx.cancel.cancelled() => return Err(ProviderError::Canceled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        match tokio::time::timeout(Duration::from_secs(10), self.complete("Say OK", 10)).await {
            Ok(Ok(_)) => HealthStatus {
                ok: true,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: None,
            },
            Ok(Err(e)) => HealthStatus {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: Some(redact_secrets(&e.to_string())),
            },
            Err(_) => HealthStatus {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: Some("health probe timed out".into()),
            },
        }
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}
