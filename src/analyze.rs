//! Entry points: wire the configured engines into an orchestrator and run
//! it over files, directories, or in-memory bytes.
//!
//! Single-document calls return a typed failure or a completed result.
//! Batch calls always return one result per document.

use crate::config::AnalysisConfig;
use crate::document::{Document, SourceFormat};
use crate::engine::{create_provider, resolve_provider, LlmEngine, ResponseEngine};
use crate::error::AnalyzerError;
use crate::loader::{LoadOptions, ParserRegistry};
use crate::orchestrator::{AnalysisOrchestrator, CancelSignal};
use crate::output::AnalysisResult;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Suffix appended to the input stem for result files.
pub const OUTPUT_SUFFIX: &str = "_analysis.json";

/// Build the orchestrator described by `config`.
///
/// The primary engine comes from `config.provider`, else `config.provider_name`,
/// else the environment (see [`resolve_provider`]). A fallback engine is
/// built only when a fallback provider or provider name is configured.
pub fn build_orchestrator(config: &AnalysisConfig) -> Result<AnalysisOrchestrator, AnalyzerError> {
    let options = config.engine_options();

    let primary: Arc<dyn ResponseEngine> = match &config.provider {
        Some(provider) => Arc::new(LlmEngine::new(
            config.provider_name.as_deref().unwrap_or("primary"),
            &config.model,
            Arc::clone(provider),
            options.clone(),
        )),
        None => {
            let (provider, name, model) =
                resolve_provider(config.provider_name.as_deref(), &config.model)?;
            Arc::new(LlmEngine::new(name, model, provider, options.clone()))
        }
    };
    debug!("Primary engine: {} ({:?})", primary.name(), primary.model());

    let mut orchestrator = AnalysisOrchestrator::new(primary, config);

    let fallback_model = config.fallback_model();
    let fallback: Option<Arc<dyn ResponseEngine>> = match (
        &config.fallback_provider,
        config.fallback_provider_name.as_deref(),
    ) {
        (Some(provider), name) => Some(Arc::new(LlmEngine::new(
            name.unwrap_or("fallback"),
            fallback_model,
            Arc::clone(provider),
            options,
        ))),
        (None, Some(name)) => Some(Arc::new(LlmEngine::new(
            name,
            fallback_model,
            create_provider(name, fallback_model)?,
            options,
        ))),
        (None, None) => None,
    };
    if let Some(fallback) = fallback {
        debug!("Fallback engine: {} ({:?})", fallback.name(), fallback.model());
        orchestrator = orchestrator.with_fallback(fallback);
    }
    Ok(orchestrator)
}

/// Analyse one file.
///
/// # Errors
/// - provider resolution problems ([`AnalyzerError::ProviderNotConfigured`])
/// - a failed flow ([`AnalyzerError::AnalysisFailed`], carrying the category)
pub async fn analyze_file(
    path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalyzerError> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.analyze_path(path.as_ref()).await.into_result()
}

/// Analyse a loaded document.
pub async fn analyze_document(
    document: &Document,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalyzerError> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.analyze(document).await.into_result()
}

/// Analyse every supported file under `dir`.
///
/// Returns `(path, result)` pairs sorted by path; failed documents are
/// included as failed results.
pub async fn analyze_directory(
    dir: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<Vec<(PathBuf, AnalysisResult)>, AnalyzerError> {
    analyze_directory_with_cancel(dir, config, CancelSignal::never()).await
}

pub async fn analyze_directory_with_cancel(
    dir: impl AsRef<Path>,
    config: &AnalysisConfig,
    cancel: CancelSignal,
) -> Result<Vec<(PathBuf, AnalysisResult)>, AnalyzerError> {
    let orchestrator = build_orchestrator(config)?;
    let paths = orchestrator.registry().discover(dir.as_ref()).await?;
    let results = orchestrator
        .analyze_paths_with_cancel(paths.clone(), cancel)
        .await;
    Ok(paths.into_iter().zip(results).collect())
}

/// Analyse one file and write its result as JSON, completed or failed.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn analyze_to_file(
    path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalyzerError> {
    let orchestrator = build_orchestrator(config)?;
    let result = orchestrator.analyze_path(path.as_ref()).await;
    write_result_json(output_path, &result).await?;
    Ok(result)
}

/// Analyse in-memory bytes. `extension` (without the dot) selects the parser.
///
/// The bytes are written to a managed [`tempfile`], deleted on return.
pub async fn analyze_bytes(
    bytes: &[u8],
    extension: &str,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalyzerError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(&format!(".{}", extension.trim_start_matches('.')))
        .tempfile()
        .map_err(|e| AnalyzerError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| AnalyzerError::Internal(format!("tempfile write: {e}")))?;
    analyze_file(tmp.path(), config).await
}

/// Synchronous wrapper around [`analyze_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalyzerError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalyzerError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze_file(path, config))
}

/// Text analysed by [`check_connection`].
const CONNECTION_CHECK_TEXT: &str = "# Connection Check\n\n\
This is a short test paper used to verify that the configured engine answers.\n\n\
It proposes nothing and evaluates nothing.";

/// Run one minimal analysis to see whether the configured engines answer.
///
/// Returns the result as is: a `service` failure means no engine could be
/// reached; a `validation` failure means an engine answered but its reply
/// did not fill the schema.
pub async fn check_connection(config: &AnalysisConfig) -> Result<AnalysisResult, AnalyzerError> {
    let orchestrator = build_orchestrator(config)?;
    let document = Document::new(
        "connection_check.md",
        SourceFormat::Markdown,
        CONNECTION_CHECK_TEXT,
        1,
    );
    info!("Checking engine connection");
    Ok(orchestrator.analyze(&document).await)
}

/// Load a document without analysing it.
///
/// Does not require an LLM provider or API key.
pub async fn extract(
    path: impl AsRef<Path>,
    options: &LoadOptions,
) -> Result<Document, AnalyzerError> {
    let registry = ParserRegistry::with_defaults();
    Ok(registry.load(path.as_ref(), options).await?)
}

/// `<out_dir>/<stem>_analysis.json` for `input`.
pub fn output_path_for(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    out_dir.join(format!("{stem}{OUTPUT_SUFFIX}"))
}

/// Result paths for a batch of `inputs` discovered under `in_dir`.
///
/// The directory layout below `in_dir` is mirrored under `out_dir`, so
/// `in/a/paper.txt` lands at `out/a/paper_analysis.json`. Inputs that still
/// share a target (`paper.md` next to `paper.txt`) keep the plain name for
/// the first one in input order; later ones get their extension, then a
/// counter, appended to the stem. The returned paths are pairwise distinct.
pub fn batch_output_paths(inputs: &[PathBuf], in_dir: &Path, out_dir: &Path) -> Vec<PathBuf> {
    let mut taken: HashSet<PathBuf> = HashSet::with_capacity(inputs.len());
    inputs
        .iter()
        .map(|input| {
            let relative_dir = input
                .strip_prefix(in_dir)
                .ok()
                .and_then(Path::parent)
                .unwrap_or_else(|| Path::new(""));
            let target_dir = out_dir.join(relative_dir);
            let plain = output_path_for(input, &target_dir);
            if taken.insert(plain.clone()) {
                return plain;
            }

            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            let base = format!("{stem}_{ext}");
            let mut candidate = target_dir.join(format!("{base}{OUTPUT_SUFFIX}"));
            let mut n = 2usize;
            while !taken.insert(candidate.clone()) {
                candidate = target_dir.join(format!("{base}_{n}{OUTPUT_SUFFIX}"));
                n += 1;
            }
            debug!("{} renamed to {} to avoid a clash", input.display(), candidate.display());
            candidate
        })
        .collect()
}

/// Serialise `result` as pretty JSON at `path`, creating parent directories.
pub async fn write_result_json(
    path: impl AsRef<Path>,
    result: &AnalysisResult,
) -> Result<(), AnalyzerError> {
    let path = path.as_ref();
    let write_err = |e: std::io::Error| AnalyzerError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_string_pretty(result)
        .map_err(|e| AnalyzerError::Internal(format!("serialise result: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    info!("Wrote {}", path.display());
    Ok(())
}
