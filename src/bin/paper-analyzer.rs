//! CLI binary for edgequake-paper-analyzer.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig` and writes results as JSON.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_paper_analyzer::{
    analyze_to_file, batch_output_paths, build_orchestrator, check_connection, extract,
    write_result_json, AnalysisConfig, AnalysisConfigBuilder, AnalysisProgressCallback,
    AnalysisResult, CancelHandle, FailureCategory, LoadOptions, ParserRegistry, ProgressCallback,
    PromptVersion, StripConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per document.
/// Documents complete out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Discovering documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} papers  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting analysis of {total} papers…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, path: Option<&Path>) {
        self.start_times.lock().unwrap().insert(index, Instant::now());
        if let Some(name) = path.and_then(|p| p.file_name()) {
            self.bar.set_message(name.to_string_lossy().into_owned());
        }
    }

    fn on_document_complete(&self, index: usize, total: usize, result: &AnalysisResult) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}",
            green("✓"),
            index + 1,
            total,
            result.document_id,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, completed: usize) {
        let failed = total.saturating_sub(completed);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} papers analysed", green("✔"), bold(&completed.to_string()));
        } else {
            eprintln!(
                "{} {}/{} papers analysed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&completed.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse one paper (JSON to stdout)
  paper-analyzer analyze attention.pdf

  # Analyse to a file with the Chinese enhanced prompt
  paper-analyzer analyze attention.pdf -o attention_analysis.json --prompt-version ZH_2_0

  # Analyse a directory, 5 at a time, with a fallback provider
  paper-analyzer batch papers/ -o results/ -c 5 --fallback-provider anthropic

  # Extract cleaned text only (no API key needed)
  paper-analyzer extract attention.pdf

  # Check that the configured provider answers
  paper-analyzer test-connection --provider anthropic

  # Show prompt versions and supported formats
  paper-analyzer info

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  PAPER_ANALYZER_*        Any flag below, e.g. PAPER_ANALYZER_CONCURRENCY=5
"#;

/// Structured analysis of research papers with LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "paper-analyzer",
    version,
    about = "Structured analysis of research papers with LLMs",
    long_about = "Extract clean text from PDF, text and Markdown papers and produce a \
structured analysis (summary, problem, solution, limitations, contributions) with any \
provider supported by edgequake-llm.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPER_ANALYZER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPER_ANALYZER_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "PAPER_ANALYZER_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse one document.
    Analyze {
        /// PDF, text or Markdown file.
        input: PathBuf,

        /// Write the JSON result to this file instead of stdout.
        #[arg(short, long, env = "PAPER_ANALYZER_OUTPUT")]
        output: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Analyse every supported document under a directory.
    Batch {
        /// Directory searched recursively.
        dir: PathBuf,

        /// Directory for `<stem>_analysis.json` files, mirroring the input tree.
        #[arg(short, long, env = "PAPER_ANALYZER_OUTPUT_DIR", default_value = "output")]
        output_dir: PathBuf,

        /// Documents analysed concurrently.
        #[arg(short, long, env = "PAPER_ANALYZER_CONCURRENCY", default_value_t = 3)]
        concurrency: usize,

        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Print the cleaned text of a document. No API key needed.
    Extract {
        input: PathBuf,

        /// Print the full document (metadata, images) as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Send one tiny analysis to check that the configured engine answers.
    TestConnection {
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// List prompt versions, their fields, and supported formats.
    Info,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// LLM model ID (e.g. gpt-4o, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "PAPER_ANALYZER_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "PAPER_ANALYZER_PROVIDER")]
    provider: Option<String>,

    /// Provider tried when the primary fails.
    #[arg(long, env = "PAPER_ANALYZER_FALLBACK_PROVIDER")]
    fallback_provider: Option<String>,

    /// Model for the fallback provider (defaults to --model).
    #[arg(long, env = "PAPER_ANALYZER_FALLBACK_MODEL")]
    fallback_model: Option<String>,

    /// Prompt version: EN, EN_2_0, ZH, ZH_2_0.
    #[arg(long, env = "PAPER_ANALYZER_PROMPT_VERSION", default_value = "EN_2_0",
          value_parser = parse_prompt_version)]
    prompt_version: PromptVersion,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PAPER_ANALYZER_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "PAPER_ANALYZER_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// Body characters sent to the model; longer bodies are truncated.
    #[arg(long, env = "PAPER_ANALYZER_MAX_BODY_CHARS", default_value_t = 128_000)]
    max_body_chars: usize,

    /// Retries per engine on transient failures.
    #[arg(long, env = "PAPER_ANALYZER_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PAPER_ANALYZER_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Skip the schema-constrained call and ask for plain text.
    #[arg(long, env = "PAPER_ANALYZER_NO_STRUCTURED")]
    no_structured: bool,

    /// Fraction of fields that must be recovered (0.0–1.0).
    #[arg(long, env = "PAPER_ANALYZER_MIN_FIELD_FRACTION", default_value_t = 1.0)]
    min_field_fraction: f64,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAPER_ANALYZER_PASSWORD")]
    password: Option<String>,

    /// Keep repeating page headers and footers.
    #[arg(long, env = "PAPER_ANALYZER_NO_STRIP")]
    no_strip: bool,

    /// Fraction of pages a line must repeat on to count as a header/footer.
    #[arg(long, env = "PAPER_ANALYZER_STRIP_THRESHOLD", default_value_t = 0.5)]
    strip_threshold: f64,

    /// Lines at the top and bottom of each page checked for repetition.
    #[arg(long, env = "PAPER_ANALYZER_STRIP_ZONE", default_value_t = 3)]
    strip_zone: usize,

    /// Keep embedded images (PDF only).
    #[arg(long, env = "PAPER_ANALYZER_EXTRACT_IMAGES")]
    extract_images: bool,
}

impl LoadArgs {
    fn strip(&self) -> StripConfig {
        StripConfig {
            threshold: self.strip_threshold,
            zone_lines: self.strip_zone,
            ..StripConfig::default()
        }
    }

    fn options(&self) -> LoadOptions {
        LoadOptions {
            extract_images: self.extract_images,
            strip_headers_footers: !self.no_strip,
            strip: self.strip(),
            password: self.password.clone(),
            ..LoadOptions::default()
        }
    }
}

fn parse_prompt_version(s: &str) -> std::result::Result<PromptVersion, String> {
    s.parse().map_err(|e: edgequake_paper_analyzer::AnalyzerError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && matches!(cli.command, Command::Batch { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Analyze {
            input,
            output,
            engine,
            load,
        } => run_analyze(&cli, input, output.as_deref(), engine, load).await,
        Command::Batch {
            dir,
            output_dir,
            concurrency,
            engine,
            load,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn AnalysisProgressCallback>)
            } else {
                None
            };
            run_batch(&cli, dir, output_dir, *concurrency, engine, load, progress).await
        }
        Command::Extract { input, json, load } => {
            let doc = extract(input, &load.options())
                .await
                .with_context(|| format!("Failed to extract {}", input.display()))?;
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&doc).context("Failed to serialise document")?
                );
            } else {
                println!("{}", doc.body());
                if !cli.quiet {
                    eprintln!(
                        "{}",
                        dim(&format!(
                            "{} pages, {} words, {} images",
                            doc.page_count(),
                            doc.word_count(),
                            doc.images().len()
                        ))
                    );
                }
            }
            Ok(())
        }
        Command::TestConnection { engine } => run_test_connection(&cli, engine).await,
        Command::Info => {
            print_info();
            Ok(())
        }
    }
}

async fn run_analyze(
    cli: &Cli,
    input: &Path,
    output: Option<&Path>,
    engine: &EngineArgs,
    load: &LoadArgs,
) -> Result<()> {
    let config = build_config(engine, load, 1, None)?;

    let result = match output {
        Some(path) => analyze_to_file(input, path, &config)
            .await
            .context("Analysis failed")?,
        None => {
            let orchestrator = build_orchestrator(&config).context("Failed to set up engines")?;
            let result = orchestrator.analyze_path(input).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialise result")?
            );
            result
        }
    };

    if let Some(detail) = &result.error_detail {
        bail!("{} failed ({}): {}", result.document_id, detail.category, detail.message);
    }
    if !cli.quiet {
        eprintln!(
            "{}  {}  {}ms  {} tokens in / {} out{}",
            green("✔"),
            bold(&result.document_id),
            result.metrics.duration_ms,
            result.metrics.input_tokens,
            result.metrics.output_tokens,
            output
                .map(|p| format!("  →  {}", p.display()))
                .unwrap_or_default(),
        );
        for issue in &result.quality_issues {
            eprintln!("   {} {}", dim("!"), issue);
        }
    }
    Ok(())
}

async fn run_batch(
    cli: &Cli,
    dir: &Path,
    output_dir: &Path,
    concurrency: usize,
    engine: &EngineArgs,
    load: &LoadArgs,
    progress: Option<ProgressCallback>,
) -> Result<()> {
    let config = build_config(engine, load, concurrency, progress)?;
    let orchestrator = build_orchestrator(&config).context("Failed to set up engines")?;
    let paths = orchestrator
        .registry()
        .discover(dir)
        .await
        .context("Failed to discover documents")?;

    let cancel = CancelHandle::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", red("Interrupted, cancelling remaining papers…"));
            on_ctrl_c.cancel();
        }
    });

    let started = Instant::now();
    let results = orchestrator
        .analyze_paths_with_cancel(paths.clone(), cancel.signal())
        .await;

    let outputs = batch_output_paths(&paths, dir, output_dir);
    let mut failed = 0usize;
    for (out, result) in outputs.iter().zip(&results) {
        if !result.is_completed() {
            failed += 1;
        }
        write_result_json(out, result)
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
    }

    if !cli.quiet {
        let tokens_in: u64 = results.iter().map(|r| r.metrics.input_tokens).sum();
        let tokens_out: u64 = results.iter().map(|r| r.metrics.output_tokens).sum();
        eprintln!(
            "   {}/{} papers  {}ms  →  {}",
            results.len() - failed,
            results.len(),
            started.elapsed().as_millis(),
            bold(&output_dir.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&tokens_in.to_string()),
            dim(&tokens_out.to_string()),
        );
    }
    if cancel.is_cancelled() {
        bail!("Batch cancelled");
    }
    if failed == results.len() {
        bail!("All {} papers failed", failed);
    }
    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(
    engine: &EngineArgs,
    load: &LoadArgs,
    concurrency: usize,
    progress: Option<ProgressCallback>,
) -> Result<AnalysisConfig> {
    let mut builder = engine_builder(engine)
        .concurrency(concurrency)
        .strip_headers_footers(!load.no_strip)
        .strip(load.strip())
        .extract_images(load.extract_images);

    if let Some(ref pwd) = load.password {
        builder = builder.password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Builder with the engine flags applied.
fn engine_builder(engine: &EngineArgs) -> AnalysisConfigBuilder {
    let mut builder = AnalysisConfig::builder()
        .prompt_version(engine.prompt_version)
        .temperature(engine.temperature)
        .max_tokens(engine.max_tokens)
        .max_body_chars(engine.max_body_chars)
        .max_retries(engine.max_retries)
        .api_timeout_secs(engine.api_timeout)
        .structured_output(!engine.no_structured)
        .min_field_fraction(engine.min_field_fraction);

    if let Some(ref model) = engine.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = engine.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref provider) = engine.fallback_provider {
        builder = builder.fallback_provider_name(provider);
    }
    if let Some(ref model) = engine.fallback_model {
        builder = builder.fallback_model(model);
    }
    builder
}

async fn run_test_connection(cli: &Cli, engine: &EngineArgs) -> Result<()> {
    let config = engine_builder(engine)
        .build()
        .context("Invalid configuration")?;
    let result = check_connection(&config)
        .await
        .context("Failed to set up engines")?;

    let via = match (result.engine_used, result.model_used.as_deref()) {
        (Some(role), Some(model)) => format!("{role} engine, {model}"),
        (Some(role), None) => format!("{role} engine"),
        _ => "no engine".to_string(),
    };
    match result.failure_category() {
        None => {
            if !cli.quiet {
                eprintln!(
                    "{}  Engine connection OK ({via}, {}ms)",
                    green("✔"),
                    result.metrics.duration_ms
                );
            }
            Ok(())
        }
        Some(FailureCategory::Validation) => {
            if !cli.quiet {
                eprintln!(
                    "{}  Engine answered ({via}) but the reply did not fill the schema",
                    dim("!")
                );
            }
            Ok(())
        }
        Some(_) => {
            let message = result
                .error_detail
                .map(|d| d.message)
                .unwrap_or_default();
            bail!("Engine connection failed ({via}): {message}")
        }
    }
}

fn print_info() {
    println!("{}", bold("Prompt versions"));
    for version in PromptVersion::ALL {
        let spec = version.spec();
        println!(
            "  {:<8} {:?}{}",
            version.tag(),
            spec.language,
            if version == PromptVersion::default() {
                dim("  (default)")
            } else {
                String::new()
            }
        );
        println!("           {}", dim(&spec.field_names().collect::<Vec<_>>().join(", ")));
    }

    println!();
    println!("{}", bold("Supported formats"));
    for (name, extensions) in ParserRegistry::with_defaults().parsers() {
        let exts: Vec<String> = extensions.iter().map(|e| format!(".{e}")).collect();
        println!("  {:<8} {}", name, exts.join(", "));
    }
}
