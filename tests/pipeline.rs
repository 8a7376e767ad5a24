//! Integration tests for the analysis pipeline with scripted engines.
//!
//! No network and no pdfium: engines are in-process mocks and PDF text comes
//! from a fake extractor, so these run everywhere.

use async_trait::async_trait;
use edgequake_paper_analyzer::pipeline::extract::{
    ExtractOptions, ExtractedPages, PageContent, TextExtractor,
};
use edgequake_paper_analyzer::{
    analyze_stream, AnalysisConfig, AnalysisOrchestrator, AnalysisProgressCallback,
    AnalysisResult, CancelHandle, CancelSignal, DocumentMetadata, EngineResponse, EngineRole,
    FailureCategory, ParseError, ParserRegistry, ResponseEngine, ServiceError,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn analysis_json(title: &str) -> String {
    format!(
        r#"{{"title":"{title}","summary":"s","problem":"p","solution":"so",
            "limitations":"l","key_contributions":"k","research_significance":"r"}}"#
    )
}

/// `DOC-<n>` tag embedded in a prompt, if any.
fn doc_tag(prompt: &str) -> Option<String> {
    let start = prompt.find("DOC-")?;
    let digits: String = prompt[start + 4..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some(format!("DOC-{digits}"))
}

fn network_error(engine: &str) -> ServiceError {
    ServiceError::Network {
        engine: engine.into(),
        detail: "connection reset".into(),
    }
}

/// Echoes the document tag back as the title, after an optional delay.
/// Tracks how many calls run at once.
#[derive(Default)]
struct EchoEngine {
    delay_ms: u64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ResponseEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> Option<&str> {
        Some("echo-1")
    }

    async fn respond(&self, prompt: &str) -> Result<EngineResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        // Later documents finish first so completion order differs from input order.
        let tag = doc_tag(prompt).unwrap_or_else(|| "untagged".into());
        let n: u64 = tag.trim_start_matches("DOC-").parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(self.delay_ms * (10 - n.min(9)))).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(EngineResponse {
            content: analysis_json(&tag),
            input_tokens: 100,
            output_tokens: 20,
            structured: false,
            attempts: 1,
        })
    }
}

/// Always fails with the given error.
struct FailingEngine(ServiceError);

#[async_trait]
impl ResponseEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn respond(&self, _prompt: &str) -> Result<EngineResponse, ServiceError> {
        Err(self.0.clone())
    }
}

/// Never answers.
struct StalledEngine;

#[async_trait]
impl ResponseEngine for StalledEngine {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn respond(&self, _prompt: &str) -> Result<EngineResponse, ServiceError> {
        std::future::pending().await
    }
}

/// Returns fixed pages for any PDF.
struct FakeExtractor(Vec<String>);

#[async_trait]
impl TextExtractor for FakeExtractor {
    fn name(&self) -> &str {
        "fake"
    }

    async fn extract(
        &self,
        _path: &Path,
        _options: &ExtractOptions,
    ) -> Result<ExtractedPages, ParseError> {
        Ok(ExtractedPages {
            pages: self
                .0
                .iter()
                .enumerate()
                .map(|(index, text)| PageContent {
                    index,
                    text: text.clone(),
                    images: Vec::new(),
                })
                .collect(),
            metadata: DocumentMetadata::default(),
        })
    }
}

fn write_papers(dir: &Path, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let path = dir.join(format!("paper{i}.txt"));
            std::fs::write(&path, format!("DOC-{i}\n\nA study of something.")).unwrap();
            path
        })
        .collect()
}

fn config(concurrency: usize) -> AnalysisConfig {
    AnalysisConfig::builder()
        .concurrency(concurrency)
        .build()
        .unwrap()
}

// ── Batch semantics ──────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_results_follow_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 6);
    let engine = Arc::new(EchoEngine {
        delay_ms: 2,
        ..Default::default()
    });
    let orch = AnalysisOrchestrator::new(engine.clone(), &config(3));

    let results = orch.analyze_paths(paths).await;

    assert_eq!(results.len(), 6);
    for (i, r) in results.iter().enumerate() {
        assert!(r.is_completed(), "{i}: {:?}", r.error_detail);
        assert_eq!(r.field("title"), Some(format!("DOC-{i}").as_str()));
        assert!(r.document_id.starts_with(&format!("paper{i}_")));
    }
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 8);
    let engine = Arc::new(EchoEngine {
        delay_ms: 3,
        ..Default::default()
    });
    let orch = AnalysisOrchestrator::new(engine.clone(), &config(2));

    let results = orch.analyze_paths(paths).await;

    assert_eq!(results.len(), 8);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 8);
    let max = engine.max_active.load(Ordering::SeqCst);
    assert!(max <= 2, "max concurrent calls: {max}");
    assert!(max >= 1);
}

#[tokio::test]
async fn one_missing_file_does_not_abort_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = write_papers(dir.path(), 2);
    paths.insert(1, dir.path().join("vanished.pdf"));
    let orch = AnalysisOrchestrator::new(Arc::new(EchoEngine::default()), &config(3));

    let results = orch.analyze_paths(paths).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_completed());
    assert!(results[2].is_completed());
    let failed = &results[1];
    assert_eq!(failed.failure_category(), Some(FailureCategory::Parse));
    assert_eq!(failed.engine_used, None);
    assert!(failed.fields.iter().all(|(_, v)| !v.is_present()));
}

#[tokio::test]
async fn fallback_engine_rescues_failed_primary() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 2);
    let fallback = Arc::new(EchoEngine::default());
    let orch = AnalysisOrchestrator::new(
        Arc::new(FailingEngine(network_error("primary"))),
        &config(2),
    )
    .with_fallback(fallback.clone());

    let results = orch.analyze_paths(paths).await;

    for r in &results {
        assert!(r.is_completed());
        assert_eq!(r.engine_used, Some(EngineRole::Fallback));
        assert_eq!(r.model_used.as_deref(), Some("echo-1"));
        assert!(r.primary_error.as_deref().unwrap().contains("connection reset"));
    }
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn both_engines_failing_yields_service_failure() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 1);
    let orch = AnalysisOrchestrator::new(
        Arc::new(FailingEngine(network_error("primary"))),
        &config(1),
    )
    .with_fallback(Arc::new(FailingEngine(ServiceError::Auth {
        engine: "fallback".into(),
        detail: "invalid key".into(),
    })));

    let result = &orch.analyze_paths(paths).await[0];

    assert_eq!(result.failure_category(), Some(FailureCategory::Service));
    assert_eq!(result.engine_used, Some(EngineRole::Fallback));
    assert!(result.error_detail.as_ref().unwrap().message.contains("invalid key"));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_fails_unfinished_documents() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 4);
    let orch = AnalysisOrchestrator::new(Arc::new(StalledEngine), &config(2));

    let handle = CancelHandle::new();
    let trigger = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        orch.analyze_paths_with_cancel(paths, handle.signal()),
    )
    .await
    .expect("cancelled batch should return");

    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|r| r.failure_category() == Some(FailureCategory::Cancelled)));
}

// ── Loading through the registry ─────────────────────────────────────────────

#[tokio::test]
async fn repeating_footers_never_reach_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("paper.pdf");
    std::fs::write(&pdf, b"%PDF-1.7\n% fake body\n").unwrap();

    let words = ["alpha", "bravo", "charlie", "delta", "echo"];
    let pages: Vec<String> = words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            format!(
                "Proceedings of Testing 2024\n{w} findings\n{w} discussion\nPage {} of 5",
                i + 1
            )
        })
        .collect();
    let registry = Arc::new(ParserRegistry::with_extractor(Arc::new(FakeExtractor(pages))));

    let engine = Arc::new(EchoEngine::default());
    let orch = AnalysisOrchestrator::new(engine.clone(), &config(1)).with_registry(registry);

    let result = orch.analyze_path(&pdf).await;
    assert!(result.is_completed(), "{:?}", result.error_detail);

    let prompts = engine.prompts.lock().unwrap();
    let prompt = &prompts[0];
    assert!(prompt.contains("alpha findings"));
    assert!(prompt.contains("echo discussion"));
    assert!(!prompt.contains("Proceedings of Testing"));
    assert!(!prompt.contains("of 5"));
}

// ── Streaming and progress ───────────────────────────────────────────────────

#[tokio::test]
async fn stream_yields_every_document_once() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 5);
    let orch = AnalysisOrchestrator::new(
        Arc::new(EchoEngine {
            delay_ms: 1,
            ..Default::default()
        }),
        &config(2),
    );

    let mut seen: Vec<usize> = analyze_stream(&orch, paths, CancelSignal::never())
        .map(|(index, result)| {
            assert!(result.is_completed());
            index
        })
        .collect()
        .await;
    seen.sort_unstable();
    assert_eq!(seen, [0, 1, 2, 3, 4]);
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    batch_completed: AtomicUsize,
}

impl AnalysisProgressCallback for Counting {
    fn on_document_start(&self, _index: usize, _total: usize, _path: Option<&Path>) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _index: usize, _total: usize, _result: &AnalysisResult) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_error(&self, _index: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_complete(&self, _total: usize, completed: usize) {
        self.batch_completed.store(completed, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_document() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = write_papers(dir.path(), 3);
    paths.push(dir.path().join("missing.md"));

    let counter = Arc::new(Counting::default());
    let config = AnalysisConfig::builder()
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    let orch = AnalysisOrchestrator::new(Arc::new(EchoEngine::default()), &config);

    orch.analyze_paths(paths).await;

    assert_eq!(counter.started.load(Ordering::SeqCst), 4);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 3);
    assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
    assert_eq!(counter.batch_completed.load(Ordering::SeqCst), 3);
}

// ── Serialised shape ─────────────────────────────────────────────────────────

#[tokio::test]
async fn result_json_has_one_key_per_field() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_papers(dir.path(), 1);
    let orch = AnalysisOrchestrator::new(Arc::new(EchoEngine::default()), &config(1));
    let result = orch.analyze_path(&paths[0]).await;

    let value = serde_json::to_value(&result).unwrap();
    for key in [
        "title",
        "summary",
        "problem",
        "solution",
        "limitations",
        "key_contributions",
        "research_significance",
    ] {
        assert!(value[key].is_string(), "{key}");
    }
    assert_eq!(value["status"], "completed");
    assert_eq!(value["engine_used"], "primary");
    assert!(value["error_detail"].is_null());
}
