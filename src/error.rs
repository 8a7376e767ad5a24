//! Error types for the edgequake-paper-analyzer library.
//!
//! Failures fall into two groups:
//!
//! * [`AnalyzerError`] is **fatal**: nothing can be analysed at all (invalid
//!   configuration, no LLM provider, output file cannot be written). Returned
//!   as `Err(AnalyzerError)` from the top-level `analyze*` functions.
//!
//! * [`ParseError`], [`ServiceError`], [`ValidationError`] are **per-document**:
//!   one document could not be loaded, the engine failed, or the response did
//!   not resolve the schema. These end a single flow and are recorded inside
//!   [`crate::output::AnalysisResult`] as an [`ErrorDetail`], so a batch of
//!   many documents still reports partial success.

use crate::output::AnalysisFields;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-paper-analyzer library.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The prompt version tag is not one of the built-in versions.
    #[error("Unknown prompt version '{0}'. Supported: EN, EN_2_0, ZH, ZH_2_0")]
    UnknownPromptVersion(String),

    /// Two parsers claimed the same file extension.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// A batch input directory does not exist or is not a directory.
    #[error("Input directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// A batch input directory contains no supported documents.
    #[error("No supported documents found in '{path}' (looked for: {extensions})")]
    NoDocuments { path: PathBuf, extensions: String },

    /// Document loading failed; only returned by the extraction-only entry points.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A single-document analysis ended in the `failed` state.
    ///
    /// Returned by [`crate::output::AnalysisResult::into_result`] when the
    /// caller wants a typed failure instead of inspecting `status`.
    #[error("Analysis of '{document_id}' failed ({category}): {message}")]
    AnalysisFailed {
        document_id: String,
        category: FailureCategory,
        message: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Source-extraction failures: the document never reached an engine.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// Reading failed for a reason other than existence or permission.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Content is not valid for the declared format.
    #[error("'{path}' is not a valid {format} document: {detail}")]
    Corrupt {
        path: PathBuf,
        format: String,
        detail: String,
    },

    /// The PDF requires a password that was not provided or is wrong.
    #[error("PDF '{path}' is encrypted; provide the correct password with --password")]
    Encrypted { path: PathBuf },

    /// The document has zero pages or no extractable text.
    #[error("'{path}' contains no extractable text")]
    Empty { path: PathBuf },

    /// No registered parser owns the file extension.
    #[error("No parser registered for '{path}' (supported: {supported})")]
    Unsupported { path: PathBuf, supported: String },

    /// The extraction backend (pdfium) could not be loaded.
    #[error(
        "PDF backend unavailable: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    Backend(String),
}

/// Engine failures: network, auth, rate limit, or an unusable upstream reply.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Transport-level failure (connection refused, DNS, 5xx).
    #[error("Network error from engine '{engine}': {detail}")]
    Network { engine: String, detail: String },

    /// Authentication error (401/403); retrying will not help.
    #[error("Authentication error from engine '{engine}': {detail}")]
    Auth { engine: String, detail: String },

    /// HTTP 429 from the upstream API.
    #[error("Rate limit exceeded for engine '{engine}'")]
    RateLimited {
        engine: String,
        retry_after_secs: Option<u64>,
    },

    /// The call did not complete within the configured timeout.
    #[error("Engine '{engine}' timed out after {secs}s")]
    Timeout { engine: String, secs: u64 },

    /// The upstream reply could not be used (empty, filtered, not parseable).
    #[error("Malformed response from engine '{engine}': {detail}")]
    MalformedResponse { engine: String, detail: String },

    /// The engine does not offer the requested capability.
    #[error("Engine '{engine}' does not support {capability}")]
    Unsupported { engine: String, capability: String },
}

impl ServiceError {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Network { .. } | ServiceError::RateLimited { .. } | ServiceError::Timeout { .. }
        )
    }
}

/// Schema fields that stayed unresolved after both extraction strategies.
#[derive(Debug, Clone, Error)]
#[error("{} of {total} schema fields missing: {}", missing.len(), missing.join(", "))]
pub struct ValidationError {
    /// Names of the unresolved fields, in schema order.
    pub missing: Vec<String>,
    /// Number of fields in the schema.
    pub total: usize,
    /// Whatever did resolve, with unresolved fields marked missing.
    pub partial: AnalysisFields,
}

/// Registration-time conflicts in the parser registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Extension '.{extension}' is already handled by parser '{existing}' (rejected '{rejected}')")]
    ExtensionConflict {
        extension: String,
        existing: String,
        rejected: String,
    },
}

/// Cause category recorded on every failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    /// The document could not be loaded.
    Parse,
    /// The engine call failed.
    Service,
    /// The response did not resolve enough schema fields.
    Validation,
    /// The batch was cancelled before this flow finished.
    Cancelled,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::Parse => "parse",
            FailureCategory::Service => "service",
            FailureCategory::Validation => "validation",
            FailureCategory::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Category and message of the error that ended a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: FailureCategory,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<&ParseError> for ErrorDetail {
    fn from(e: &ParseError) -> Self {
        ErrorDetail::new(FailureCategory::Parse, e.to_string())
    }
}

impl From<&ServiceError> for ErrorDetail {
    fn from(e: &ServiceError) -> Self {
        ErrorDetail::new(FailureCategory::Service, e.to_string())
    }
}

impl From<&ValidationError> for ErrorDetail {
    fn from(e: &ValidationError) -> Self {
        ErrorDetail::new(FailureCategory::Validation, e.to_string())
    }
}
