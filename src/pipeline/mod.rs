//! Pipeline stages for document analysis.
//!
//! Each submodule implements one transformation step and is independently
//! testable. Only [`extract`] touches pdfium, and no stage here talks to an
//! engine; retries, fallback and concurrency belong to the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ strip ──▶ clean ──▶ prompt ──▶ (engine) ──▶ parse
//! (checks)  (pdfium)   (headers)  (text)   (render)                (fields)
//! ```
//!
//! 1. [`input`]: existence, permission and magic-byte checks
//! 2. [`extract`]: per-page text and images; runs in `spawn_blocking`
//! 3. [`encode`]: PNG-encode extracted images
//! 4. [`strip`]: drop repeating page headers and footers
//! 5. [`clean`]: deterministic text repairs, page joining
//! 6. [`prompt`]: render the template, truncating long bodies
//! 7. [`parse`]: recover schema fields from the raw reply

pub mod clean;
pub mod encode;
pub mod extract;
pub mod input;
pub mod parse;
pub mod prompt;
pub mod strip;
