//! Response engines: prompt text in, raw model reply out.
//!
//! The orchestrator only sees the [`ResponseEngine`] trait. [`LlmEngine`] is
//! the production implementation over any `edgequake_llm` provider; tests
//! plug in scripted engines.
//!
//! ## Retry Strategy
//!
//! Rate limits and 5xx errors are transient and frequent under concurrent
//! load. Transient failures are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`); authentication errors and
//! malformed replies are returned at once, since retrying cannot fix them.
//! Fallback to a second engine is the orchestrator's job, not this module's.

use crate::error::{AnalyzerError, ServiceError};
use crate::prompts::{structured_system_prompt, PromptSpec};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// A raw reply plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Produced by [`ResponseEngine::respond_structured`].
    pub structured: bool,
    /// Calls made, including retries.
    pub attempts: u32,
}

#[async_trait]
pub trait ResponseEngine: Send + Sync {
    /// Short identifier used in logs and errors, e.g. `"openai"`.
    fn name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    /// Free-form completion.
    async fn respond(&self, prompt: &str) -> Result<EngineResponse, ServiceError>;

    /// Completion constrained to `spec`'s JSON schema.
    async fn respond_structured(
        &self,
        prompt: &str,
        spec: &PromptSpec,
    ) -> Result<EngineResponse, ServiceError> {
        let _ = (prompt, spec);
        Err(ServiceError::Unsupported {
            engine: self.name().to_string(),
            capability: "structured output".into(),
        })
    }
}

/// Per-call tuning for [`LlmEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4000,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// [`ResponseEngine`] over an `edgequake_llm` chat provider.
pub struct LlmEngine {
    name: String,
    model: String,
    provider: Arc<dyn LLMProvider>,
    options: EngineOptions,
}

impl std::fmt::Debug for LlmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmEngine")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("provider", &"<dyn LLMProvider>")
            .field("options", &self.options)
            .finish()
    }
}

impl LlmEngine {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        options: EngineOptions,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            provider,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        structured: bool,
    ) -> Result<EngineResponse, ServiceError> {
        let options = &self.completion_options();
        let messages = &messages;
        let start = Instant::now();
        let mut response = with_retries(&self.name, &self.options, move || async move {
            let call = self.provider.chat(messages, Some(options));
            match timeout(self.options.timeout, call).await {
                Err(_) => Err(ServiceError::Timeout {
                    engine: self.name.clone(),
                    secs: self.options.timeout.as_secs(),
                }),
                Ok(Err(e)) => Err(classify_error(&self.name, &e.to_string())),
                Ok(Ok(r)) => {
                    if r.content.trim().is_empty() {
                        return Err(ServiceError::MalformedResponse {
                            engine: self.name.clone(),
                            detail: "empty completion".into(),
                        });
                    }
                    Ok(EngineResponse {
                        content: r.content,
                        input_tokens: r.prompt_tokens as u64,
                        output_tokens: r.completion_tokens as u64,
                        structured,
                        attempts: 1,
                    })
                }
            }
        })
        .await?;
        debug!(
            "{} ({}): {} input tokens, {} output tokens, {:?}",
            self.name,
            self.model,
            response.input_tokens,
            response.output_tokens,
            start.elapsed()
        );
        response.structured = structured;
        Ok(response)
    }
}

#[async_trait]
impl ResponseEngine for LlmEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    async fn respond(&self, prompt: &str) -> Result<EngineResponse, ServiceError> {
        self.chat(vec![ChatMessage::user(prompt)], false).await
    }

    async fn respond_structured(
        &self,
        prompt: &str,
        spec: &PromptSpec,
    ) -> Result<EngineResponse, ServiceError> {
        let messages = vec![
            ChatMessage::system(structured_system_prompt(spec)),
            ChatMessage::user(prompt),
        ];
        self.chat(messages, true).await
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
///
/// The returned response's `attempts` counts every call made.
pub async fn with_retries<F, Fut>(
    engine: &str,
    options: &EngineOptions,
    mut call: F,
) -> Result<EngineResponse, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<EngineResponse, ServiceError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let backoff = options.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                engine, attempt, options.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        match call().await {
            Ok(mut response) => {
                response.attempts = attempt + 1;
                return Ok(response);
            }
            Err(e) if e.is_transient() && attempt < options.max_retries => {
                warn!("{}: attempt {} failed: {}", engine, attempt + 1, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map a provider error message onto a [`ServiceError`] kind.
pub fn classify_error(engine: &str, message: &str) -> ServiceError {
    let lower = message.to_lowercase();
    let engine = engine.to_string();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("api key")
        || lower.contains("authentication")
    {
        ServiceError::Auth {
            engine,
            detail: message.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        ServiceError::RateLimited {
            engine,
            retry_after_secs: None,
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ServiceError::Timeout { engine, secs: 0 }
    } else if lower.contains("content filter") || lower.contains("content_filter") {
        ServiceError::MalformedResponse {
            engine,
            detail: message.to_string(),
        }
    } else {
        ServiceError::Network {
            engine,
            detail: message.to_string(),
        }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
pub fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, AnalyzerError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AnalyzerError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve a provider, from most-specific to least-specific:
///
/// 1. **Named provider + model**: the caller chose, e.g. `"openai"`.
///    [`ProviderFactory::create_llm_provider`] reads the matching API key.
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Returns the provider together with the name and model it was built for.
pub fn resolve_provider(
    provider_name: Option<&str>,
    model: &str,
) -> Result<(Arc<dyn LLMProvider>, String, String), AnalyzerError> {
    if let Some(name) = provider_name {
        return Ok((create_provider(name, model)?, name.to_string(), model.to_string()));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return Ok((create_provider(&prov, &env_model)?, prov, env_model));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return Ok((create_provider("openai", model)?, "openai".into(), model.to_string()));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AnalyzerError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok((llm_provider, "auto".into(), model.to_string()))
}
