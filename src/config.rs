//! Configuration for paper analysis.
//!
//! Every knob lives in [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. Setters clamp obviously out-of-range values;
//! [`AnalysisConfigBuilder::build`] rejects combinations that cannot work.
//!
//! # Example
//! ```rust
//! use edgequake_paper_analyzer::{AnalysisConfig, PromptVersion};
//!
//! let config = AnalysisConfig::builder()
//!     .model("gpt-4.1-mini")
//!     .prompt_version(PromptVersion::Zh2)
//!     .concurrency(5)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.concurrency, 5);
//! ```

use crate::engine::{EngineOptions, DEFAULT_MODEL};
use crate::error::AnalyzerError;
use crate::loader::LoadOptions;
use crate::pipeline::prompt::DEFAULT_MAX_BODY_CHARS;
use crate::pipeline::strip::StripConfig;
use crate::progress::ProgressCallback;
use crate::prompts::PromptVersion;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for analysing one document or a batch.
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Primary model identifier. Default: `gpt-4o`.
    pub model: String,

    /// Primary provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is resolved from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed primary provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Fallback provider name. A fallback engine is built only when this
    /// or `fallback_provider` is set.
    pub fallback_provider_name: Option<String>,

    /// Fallback model. Defaults to `model`.
    pub fallback_model: Option<String>,

    /// Pre-constructed fallback provider.
    pub fallback_provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per analysis. Default: 4000.
    pub max_tokens: usize,

    /// Body length, in characters, above which the prompt body is truncated
    /// at a word boundary. Default: 128 000.
    pub max_body_chars: usize,

    /// Prompt template and field schema. Default: [`PromptVersion::En2`].
    pub prompt_version: PromptVersion,

    /// Documents analysed at once in a batch. Default: 3.
    pub concurrency: usize,

    /// Retries per engine on transient failures. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Ask engines for schema-constrained JSON first. Default: true.
    pub structured_output: bool,

    /// Fraction of schema fields that must be recovered for a response to
    /// count as valid. Default: 1.0 (all of them).
    pub min_field_fraction: f64,

    /// Strip repeating page headers and footers from PDFs. Default: true.
    pub strip_headers_footers: bool,

    /// Header/footer detection parameters.
    pub strip: StripConfig,

    /// Keep embedded PDF images on the document. Default: false.
    pub extract_images: bool,

    /// Images larger than this many bytes are skipped. Default: 1 MiB.
    pub max_image_bytes: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            provider: None,
            fallback_provider_name: None,
            fallback_model: None,
            fallback_provider: None,
            temperature: 0.1,
            max_tokens: 4000,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            prompt_version: PromptVersion::default(),
            concurrency: 3,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            structured_output: true,
            min_field_fraction: 1.0,
            strip_headers_footers: true,
            strip: StripConfig::default(),
            extract_images: false,
            max_image_bytes: 1024 * 1024,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("fallback_provider_name", &self.fallback_provider_name)
            .field("fallback_model", &self.fallback_model)
            .field(
                "fallback_provider",
                &self.fallback_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_body_chars", &self.max_body_chars)
            .field("prompt_version", &self.prompt_version)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("structured_output", &self.structured_output)
            .field("min_field_fraction", &self.min_field_fraction)
            .field("strip_headers_footers", &self.strip_headers_footers)
            .field("strip", &self.strip)
            .field("extract_images", &self.extract_images)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when a fallback engine should be built.
    pub fn has_fallback(&self) -> bool {
        self.fallback_provider.is_some() || self.fallback_provider_name.is_some()
    }

    /// Model for the fallback engine.
    pub fn fallback_model(&self) -> &str {
        self.fallback_model.as_deref().unwrap_or(&self.model)
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            extract_images: self.extract_images,
            strip_headers_footers: self.strip_headers_footers,
            strip: self.strip,
            password: self.password.clone(),
            max_image_bytes: self.max_image_bytes,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.api_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn fallback_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.fallback_provider_name = Some(name.into());
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_model = Some(model.into());
        self
    }

    pub fn fallback_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.fallback_provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_body_chars(mut self, n: usize) -> Self {
        self.config.max_body_chars = n;
        self
    }

    pub fn prompt_version(mut self, version: PromptVersion) -> Self {
        self.config.prompt_version = version;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn structured_output(mut self, v: bool) -> Self {
        self.config.structured_output = v;
        self
    }

    pub fn min_field_fraction(mut self, fraction: f64) -> Self {
        self.config.min_field_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn strip_headers_footers(mut self, v: bool) -> Self {
        self.config.strip_headers_footers = v;
        self
    }

    pub fn strip(mut self, strip: StripConfig) -> Self {
        self.config.strip = strip;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalyzerError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(AnalyzerError::InvalidConfig("model must not be empty".into()));
        }
        if c.max_tokens == 0 {
            return Err(AnalyzerError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.max_body_chars == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "max_body_chars must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if !(c.strip.threshold > 0.0 && c.strip.threshold <= 1.0) {
            return Err(AnalyzerError::InvalidConfig(format!(
                "strip threshold must be in (0, 1], got {}",
                c.strip.threshold
            )));
        }
        if c.strip.zone_lines == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "strip zone_lines must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
