//! Analysis orchestration: one explicit state machine per document, run
//! under a shared concurrency bound.
//!
//! ```text
//! Pending ─▶ Building ─▶ CallingPrimary ─▶ Parsing ─┬─▶ Completed
//!                              │                     │
//!                              └──(error)──▶ CallingFallback ─▶ Parsing ─┬─▶ Completed
//!                                                                       └─▶ Failed
//! ```
//!
//! A flow never returns an error: every failure becomes a
//! [`AnalysisResult`] with status `failed` and an [`ErrorDetail`], so one bad
//! document never aborts the rest of a batch. Batch entry points return one
//! result per input, in input order.

use crate::config::AnalysisConfig;
use crate::document::{derive_id, Document};
use crate::engine::{EngineResponse, ResponseEngine};
use crate::error::{ErrorDetail, FailureCategory, ServiceError, ValidationError};
use crate::loader::{LoadOptions, ParserRegistry};
use crate::output::{AnalysisMetrics, AnalysisResult, EngineRole};
use crate::pipeline::parse::{ParsedAnalysis, ResultParser};
use crate::pipeline::prompt::PromptBuilder;
use crate::progress::ProgressCallback;
use crate::prompts::{PromptSpec, PromptVersion};
use crate::quality::{review_analysis, review_document};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

// ── Flow state ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Pending,
    Building,
    CallingPrimary,
    CallingFallback,
    Parsing,
    Completed,
    Failed,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed)
    }
}

/// The states one flow passed through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTrace {
    document_id: String,
    states: Vec<FlowState>,
}

impl FlowTrace {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            states: vec![FlowState::Pending],
        }
    }

    fn enter(&mut self, state: FlowState) {
        debug!("{}: {:?} → {:?}", self.document_id, self.current(), state);
        self.states.push(state);
    }

    pub fn states(&self) -> &[FlowState] {
        &self.states
    }

    pub fn current(&self) -> FlowState {
        self.states.last().copied().unwrap_or(FlowState::Pending)
    }

    pub fn visited(&self, state: FlowState) -> bool {
        self.states.contains(&state)
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cancels every flow holding a [`CancelSignal`] from this handle.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

enum Job {
    Loaded(Document),
    Path(PathBuf),
}

impl Job {
    fn document_id(&self) -> String {
        match self {
            Job::Loaded(doc) => doc.id().to_string(),
            Job::Path(path) => derive_id(path),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Job::Loaded(_) => None,
            Job::Path(path) => Some(path),
        }
    }
}

/// Runs document flows against a primary and optional fallback engine.
///
/// Cheap to clone; clones share the engines, the registry and the
/// concurrency bound.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    registry: Arc<ParserRegistry>,
    builder: PromptBuilder,
    parser: ResultParser,
    primary: Arc<dyn ResponseEngine>,
    fallback: Option<Arc<dyn ResponseEngine>>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    structured_output: bool,
    prompt_version: PromptVersion,
    load_options: LoadOptions,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("registry", &self.registry)
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|e| e.name().to_string()))
            .field("concurrency", &self.concurrency)
            .field("structured_output", &self.structured_output)
            .field("prompt_version", &self.prompt_version)
            .finish()
    }
}

impl AnalysisOrchestrator {
    /// Orchestrator over `primary` with the default parser registry.
    pub fn new(primary: Arc<dyn ResponseEngine>, config: &AnalysisConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            registry: Arc::new(ParserRegistry::with_defaults()),
            builder: PromptBuilder::new(config.max_body_chars),
            parser: ResultParser::new(config.min_field_fraction),
            primary,
            fallback: None,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            structured_output: config.structured_output,
            prompt_version: config.prompt_version,
            load_options: config.load_options(),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ResponseEngine>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ParserRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn prompt_version(&self) -> PromptVersion {
        self.prompt_version
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Analyse one loaded document.
    pub async fn analyze(&self, document: &Document) -> AnalysisResult {
        self.run_flow(document).await.0
    }

    /// Load and analyse one file. Load failures become a failed result.
    pub async fn analyze_path(&self, path: &Path) -> AnalysisResult {
        match self.registry.load(path, &self.load_options).await {
            Ok(doc) => self.analyze(&doc).await,
            Err(e) => self.parse_failure(derive_id(path), &e),
        }
    }

    /// Run one flow and return its state trace alongside the result.
    pub async fn run_flow(&self, document: &Document) -> (AnalysisResult, FlowTrace) {
        let started = Instant::now();
        let spec = self.prompt_version.spec();
        let mut trace = FlowTrace::new(document.id());
        let mut metrics = AnalysisMetrics::default();

        trace.enter(FlowState::Building);
        let mut quality_issues = review_document(document);
        for issue in &quality_issues {
            warn!("{}: {}", document.id(), issue);
        }
        let prompt = self.builder.render(document, spec);
        if prompt.truncated {
            warn!(
                "{}: body truncated to {} chars",
                document.id(),
                self.builder.max_body_chars()
            );
        }

        trace.enter(FlowState::CallingPrimary);
        let primary = self
            .attempt(self.primary.as_ref(), &prompt.text, spec, &mut trace, &mut metrics)
            .await;

        let (outcome, role, engine, primary_error) = match primary {
            Ok(parsed) => (Ok(parsed), EngineRole::Primary, self.primary.as_ref(), None),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        "{}: primary engine '{}' failed, trying fallback '{}': {}",
                        document.id(),
                        self.primary.name(),
                        fallback.name(),
                        primary_err
                    );
                    trace.enter(FlowState::CallingFallback);
                    let outcome = self
                        .attempt(fallback.as_ref(), &prompt.text, spec, &mut trace, &mut metrics)
                        .await
                        .map_err(|e| merge_partial(e, &primary_err));
                    (
                        outcome,
                        EngineRole::Fallback,
                        fallback.as_ref(),
                        Some(primary_err.to_string()),
                    )
                }
                None => (Err(primary_err), EngineRole::Primary, self.primary.as_ref(), None),
            },
        };

        let mut result = match outcome {
            Ok(parsed) => {
                trace.enter(FlowState::Completed);
                AnalysisResult::completed(document.id(), parsed.fields, spec.version, role)
            }
            Err(e) => {
                trace.enter(FlowState::Failed);
                match &e {
                    AttemptError::Service(se) => {
                        AnalysisResult::failed(document.id(), spec, Some(role), ErrorDetail::from(se))
                    }
                    AttemptError::Validation(ve) => {
                        AnalysisResult::failed(document.id(), spec, Some(role), ErrorDetail::from(ve))
                            .with_partial_fields(ve.partial.clone())
                    }
                }
            }
        };
        metrics.completeness_score = result.metrics.completeness_score;
        metrics.duration_ms = started.elapsed().as_millis() as u64;
        result.metrics = metrics;
        result.primary_error = primary_error;
        result.model_used = engine.model().map(str::to_string);
        if result.is_completed() {
            let answer_issues = review_analysis(&result.fields, result.metrics.completeness_score);
            for issue in &answer_issues {
                warn!("{}: {}", document.id(), issue);
            }
            quality_issues.extend(answer_issues);
        }
        result.quality_issues = quality_issues;

        match &result.error_detail {
            None => info!(
                "{}: completed via {} engine in {}ms ({} attempts)",
                result.document_id, role, result.metrics.duration_ms, result.metrics.attempts
            ),
            Some(detail) => warn!(
                "{}: failed ({}) via {} engine: {}",
                result.document_id, detail.category, role, detail.message
            ),
        }
        (result, trace)
    }

    /// One engine: call, then parse.
    async fn attempt(
        &self,
        engine: &dyn ResponseEngine,
        prompt: &str,
        spec: &'static PromptSpec,
        trace: &mut FlowTrace,
        metrics: &mut AnalysisMetrics,
    ) -> Result<ParsedAnalysis, AttemptError> {
        let response = self.call(engine, prompt, spec, metrics).await?;
        trace.enter(FlowState::Parsing);
        let parsed = self.parser.parse(&response.content, spec)?;
        debug!(
            "{}: parsed {}/{} fields ({:?})",
            engine.name(),
            parsed.fields.resolved(),
            parsed.fields.len(),
            parsed.method
        );
        Ok(parsed)
    }

    /// Structured call first when enabled; a plain call when the engine
    /// cannot produce structured output.
    async fn call(
        &self,
        engine: &dyn ResponseEngine,
        prompt: &str,
        spec: &'static PromptSpec,
        metrics: &mut AnalysisMetrics,
    ) -> Result<EngineResponse, ServiceError> {
        if self.structured_output {
            match engine.respond_structured(prompt, spec).await {
                Ok(response) => {
                    record(metrics, &response);
                    return Ok(response);
                }
                Err(ServiceError::Unsupported { .. }) => {
                    debug!("{}: no structured output, using plain call", engine.name());
                }
                Err(e @ ServiceError::MalformedResponse { .. }) => {
                    metrics.attempts += 1;
                    debug!("{}: structured call unusable ({}), using plain call", engine.name(), e);
                }
                Err(e) => {
                    metrics.attempts += 1;
                    return Err(e);
                }
            }
        }
        match engine.respond(prompt).await {
            Ok(response) => {
                record(metrics, &response);
                Ok(response)
            }
            Err(e) => {
                metrics.attempts += 1;
                Err(e)
            }
        }
    }

    fn parse_failure(&self, document_id: String, error: &crate::error::ParseError) -> AnalysisResult {
        warn!("{}: load failed: {}", document_id, error);
        AnalysisResult::failed(document_id, self.prompt_version.spec(), None, ErrorDetail::from(error))
    }

    fn cancelled(&self, document_id: String) -> AnalysisResult {
        AnalysisResult::failed(
            document_id,
            self.prompt_version.spec(),
            None,
            ErrorDetail::new(FailureCategory::Cancelled, "analysis cancelled"),
        )
    }

    // ── Batches ──────────────────────────────────────────────────────────

    /// Analyse loaded documents concurrently. One result per input, in
    /// input order.
    pub async fn analyze_batch(&self, documents: Vec<Document>) -> Vec<AnalysisResult> {
        self.analyze_batch_with_cancel(documents, CancelSignal::never())
            .await
    }

    pub async fn analyze_batch_with_cancel(
        &self,
        documents: Vec<Document>,
        cancel: CancelSignal,
    ) -> Vec<AnalysisResult> {
        let jobs = documents.into_iter().map(Job::Loaded).collect();
        self.collect(jobs, cancel).await
    }

    /// Load and analyse files concurrently; each load runs under the same
    /// permit as its analysis.
    pub async fn analyze_paths(&self, paths: Vec<PathBuf>) -> Vec<AnalysisResult> {
        self.analyze_paths_with_cancel(paths, CancelSignal::never())
            .await
    }

    pub async fn analyze_paths_with_cancel(
        &self,
        paths: Vec<PathBuf>,
        cancel: CancelSignal,
    ) -> Vec<AnalysisResult> {
        let jobs = paths.into_iter().map(Job::Path).collect();
        self.collect(jobs, cancel).await
    }

    /// Every flow of `paths` as `(index, result)` pairs in completion order.
    pub(crate) fn path_flows(
        &self,
        paths: Vec<PathBuf>,
        cancel: CancelSignal,
    ) -> FuturesUnordered<BoxFuture<'static, (usize, AnalysisResult)>> {
        self.flows(paths.into_iter().map(Job::Path).collect(), cancel)
    }

    async fn collect(&self, jobs: Vec<Job>, cancel: CancelSignal) -> Vec<AnalysisResult> {
        let total = jobs.len();
        if let Some(cb) = &self.progress {
            cb.on_batch_start(total);
        }
        info!("Analysing {} documents, concurrency {}", total, self.concurrency);

        let mut slots: Vec<Option<AnalysisResult>> = (0..total).map(|_| None).collect();
        let mut flows = self.flows(jobs, cancel);
        while let Some((index, result)) = flows.next().await {
            slots[index] = Some(result);
        }
        let results: Vec<AnalysisResult> = slots.into_iter().flatten().collect();

        let completed = results.iter().filter(|r| r.is_completed()).count();
        if let Some(cb) = &self.progress {
            cb.on_batch_complete(total, completed);
        }
        info!("Batch done: {}/{} completed", completed, total);
        results
    }

    fn flows(
        &self,
        jobs: Vec<Job>,
        cancel: CancelSignal,
    ) -> FuturesUnordered<BoxFuture<'static, (usize, AnalysisResult)>> {
        let total = jobs.len();
        jobs.into_iter()
            .enumerate()
            .map(|(index, job)| {
                let this = self.clone();
                let cancel = cancel.clone();
                async move { this.run_job(index, total, job, cancel).await }.boxed()
            })
            .collect()
    }

    async fn run_job(
        self,
        index: usize,
        total: usize,
        job: Job,
        mut cancel: CancelSignal,
    ) -> (usize, AnalysisResult) {
        let document_id = job.document_id();
        let work = async {
            let Ok(_permit) = self.semaphore.acquire().await else {
                return self.cancelled(document_id.clone());
            };
            if let Some(cb) = &self.progress {
                cb.on_document_start(index, total, job.path());
            }
            match &job {
                Job::Loaded(doc) => self.analyze(doc).await,
                Job::Path(path) => match self.registry.load(path, &self.load_options).await {
                    Ok(doc) => self.analyze(&doc).await,
                    Err(e) => self.parse_failure(document_id.clone(), &e),
                },
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("{}: cancelled", document_id);
                self.cancelled(document_id.clone())
            }
            result = work => result,
        };

        if let Some(cb) = &self.progress {
            match &result.error_detail {
                None => cb.on_document_complete(index, total, &result),
                Some(detail) => cb.on_document_error(index, total, &detail.message),
            }
        }
        (index, result)
    }
}

fn record(metrics: &mut AnalysisMetrics, response: &EngineResponse) {
    metrics.input_tokens += response.input_tokens;
    metrics.output_tokens += response.output_tokens;
    metrics.attempts += response.attempts.max(1);
}

/// Fill gaps in the fallback's partial fields from the primary's.
fn merge_partial(fallback: AttemptError, primary: &AttemptError) -> AttemptError {
    match (fallback, primary) {
        (AttemptError::Validation(mut f), AttemptError::Validation(p)) => {
            f.partial.fill_from(&p.partial);
            f.missing = f.partial.missing();
            AttemptError::Validation(f)
        }
        (other, _) => other,
    }
}
