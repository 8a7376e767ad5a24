//! # edgequake-paper-analyzer
//!
//! Structured analysis of research papers with Large Language Models.
//!
//! A paper (PDF, plain text or Markdown) is converted to clean text, with
//! repeating page headers and footers stripped, then sent to an LLM with a
//! schema-aware prompt. The reply, whatever shape it comes back in, is
//! parsed into a fixed set of fields (title, summary, problem, solution,
//! limitations, key contributions, and for the enhanced prompts research
//! significance).
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Load      registry picks a parser by extension
//!  ├─ 2. Extract   per-page text via pdfium (spawn_blocking)
//!  ├─ 3. Strip     repeating headers/footers removed
//!  ├─ 4. Prompt    template + field schema, body truncated at a word
//!  ├─ 5. Engine    primary LLM, then fallback on failure
//!  ├─ 6. Parse     JSON, envelope, or labelled-prose recovery
//!  └─ 7. Result    one AnalysisResult per document, completed or failed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_paper_analyzer::{analyze_file, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = AnalysisConfig::default();
//!     let result = analyze_file("attention.pdf", &config).await?;
//!     println!("{}", result.field("summary").unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper-analyzer` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-paper-analyzer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod quality;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    analyze_bytes, analyze_directory, analyze_directory_with_cancel, analyze_document,
    analyze_file, analyze_sync, analyze_to_file, batch_output_paths, build_orchestrator,
    check_connection, extract, output_path_for, write_result_json,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use document::{Document, DocumentMetadata, ExtractedImage, SourceFormat};
pub use engine::{EngineOptions, EngineResponse, LlmEngine, ResponseEngine};
pub use error::{
    AnalyzerError, ErrorDetail, FailureCategory, ParseError, RegistryError, ServiceError,
    ValidationError,
};
pub use loader::{DocumentParser, LoadOptions, ParserRegistry};
pub use orchestrator::{AnalysisOrchestrator, CancelHandle, CancelSignal, FlowState, FlowTrace};
pub use output::{AnalysisFields, AnalysisMetrics, AnalysisResult, AnalysisStatus, EngineRole, FieldValue};
pub use pipeline::strip::{HeaderFooterStripper, StripConfig};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{PromptSpec, PromptVersion};
pub use quality::{QualityIssue, QualityIssueKind};
pub use stream::{analyze_stream, ResultStream};
