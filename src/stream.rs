//! Streaming batch API: emit results as documents finish.
//!
//! Unlike [`AnalysisOrchestrator::analyze_paths`], which returns only after
//! every flow finishes, [`analyze_stream`] yields `(index, AnalysisResult)`
//! pairs in completion order. `index` is the document's position in the
//! input list; sort by it if input order matters.

use crate::orchestrator::{AnalysisOrchestrator, CancelSignal};
use crate::output::AnalysisResult;
use std::path::PathBuf;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of indexed analysis results.
pub type ResultStream = Pin<Box<dyn Stream<Item = (usize, AnalysisResult)> + Send>>;

/// Load and analyse `paths`, streaming each result as it completes.
///
/// The orchestrator's concurrency bound applies. Every input yields exactly
/// one item; failures arrive as failed results.
///
/// # Example
/// ```rust,no_run
/// use edgequake_paper_analyzer::{analyze_stream, build_orchestrator, AnalysisConfig, CancelSignal};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = build_orchestrator(&AnalysisConfig::default())?;
/// let paths = vec!["a.pdf".into(), "b.pdf".into()];
/// let mut results = analyze_stream(&orchestrator, paths, CancelSignal::never());
/// while let Some((index, result)) = results.next().await {
///     println!("#{index} {}: {:?}", result.document_id, result.status);
/// }
/// # Ok(())
/// # }
/// ```
pub fn analyze_stream(
    orchestrator: &AnalysisOrchestrator,
    paths: Vec<PathBuf>,
    cancel: CancelSignal,
) -> ResultStream {
    info!(
        "Starting streaming analysis of {} documents, concurrency {}",
        paths.len(),
        orchestrator.concurrency()
    );
    Box::pin(orchestrator.path_flows(paths, cancel))
}
