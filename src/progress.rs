//! Progress-callback trait for per-document analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as a batch moves through the orchestrator. Callers can forward
//! them to a channel, a terminal progress bar, or a log.
//!
//! # Example
//!
//! ```rust
//! use edgequake_paper_analyzer::{AnalysisConfig, AnalysisProgressCallback, AnalysisResult};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, result: &AnalysisResult) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{}/{} done ({}), doc #{index}", done, total, result.document_id);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let config = AnalysisConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::AnalysisResult;
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each document.
///
/// Flows run concurrently, so `on_document_*` may be called from several
/// tasks at once; protect shared state with atomics or a `Mutex`. All
/// methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before any document is loaded.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a flow acquires its permit.
    ///
    /// * `index`: 0-based position of the document in the batch
    /// * `path`: source file, or `None` for an already-loaded document
    fn on_document_start(&self, index: usize, total: usize, path: Option<&Path>) {
        let _ = (index, total, path);
    }

    /// Called when a document's analysis completed.
    fn on_document_complete(&self, index: usize, total: usize, result: &AnalysisResult) {
        let _ = (index, total, result);
    }

    /// Called when a document's flow ended in a failed result.
    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every flow has finished.
    fn on_batch_complete(&self, total: usize, completed: usize) {
        let _ = (total, completed);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
