//! Document loading: file path → [`Document`].
//!
//! Parsers implement [`DocumentParser`] and are looked up by file extension
//! through a [`ParserRegistry`]. The registry is built once, then shared
//! read-only (behind `Arc`) by every concurrent flow.

pub mod pdf;
pub mod text;

use crate::document::Document;
use crate::error::{AnalyzerError, ParseError, RegistryError};
use crate::pipeline::extract::{PdfiumExtractor, TextExtractor};
use crate::pipeline::strip::StripConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

pub use pdf::PdfParser;
pub use text::TextParser;

/// Per-load switches passed to every parser.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub extract_images: bool,
    pub strip_headers_footers: bool,
    pub strip: StripConfig,
    pub password: Option<String>,
    /// Encoded images above this size are skipped.
    pub max_image_bytes: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            extract_images: false,
            strip_headers_footers: true,
            strip: StripConfig::default(),
            password: None,
            max_image_bytes: 1024 * 1024,
        }
    }
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case extensions without the leading dot.
    fn extensions(&self) -> &[&'static str];

    fn can_handle(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions().iter().any(|e| *e == ext))
    }

    async fn parse(&self, path: &Path, options: &LoadOptions) -> Result<Document, ParseError>;
}

/// Lower-cased extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Extension → parser lookup table.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn DocumentParser>>,
    by_extension: BTreeMap<String, usize>,
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.parsers.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("extensions", &self.by_extension.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// PDF (pdfium) plus text/Markdown.
    pub fn with_defaults() -> Self {
        Self::with_extractor(Arc::new(PdfiumExtractor::new()))
    }

    /// Default parsers with a caller-supplied PDF text extractor.
    pub fn with_extractor(extractor: Arc<dyn TextExtractor>) -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(PdfParser::new(extractor)));
        registry.insert(Arc::new(TextParser::new()));
        registry
    }

    /// Add a parser. Fails without modifying the registry if any of its
    /// extensions is already taken.
    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) -> Result<(), RegistryError> {
        for ext in parser.extensions() {
            let ext = ext.to_ascii_lowercase();
            if let Some(&idx) = self.by_extension.get(&ext) {
                return Err(RegistryError::ExtensionConflict {
                    extension: ext,
                    existing: self.parsers[idx].name().to_string(),
                    rejected: parser.name().to_string(),
                });
            }
        }
        self.insert(parser);
        Ok(())
    }

    fn insert(&mut self, parser: Arc<dyn DocumentParser>) {
        let idx = self.parsers.len();
        for ext in parser.extensions() {
            self.by_extension.entry(ext.to_ascii_lowercase()).or_insert(idx);
        }
        debug!(
            "Registered parser '{}' for {:?}",
            parser.name(),
            parser.extensions()
        );
        self.parsers.push(parser);
    }

    pub fn parser_for(&self, path: &Path) -> Option<Arc<dyn DocumentParser>> {
        let ext = extension_of(path)?;
        self.by_extension
            .get(&ext)
            .map(|&idx| Arc::clone(&self.parsers[idx]))
    }

    /// Sorted, without dots.
    pub fn supported_extensions(&self) -> Vec<String> {
        self.by_extension.keys().cloned().collect()
    }

    /// `(parser name, extensions)` for every registered parser.
    pub fn parsers(&self) -> Vec<(String, Vec<&'static str>)> {
        self.parsers
            .iter()
            .map(|p| (p.name().to_string(), p.extensions().to_vec()))
            .collect()
    }

    fn supported_list(&self) -> String {
        self.supported_extensions()
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Load one file with the parser registered for its extension.
    pub async fn load(&self, path: &Path, options: &LoadOptions) -> Result<Document, ParseError> {
        let parser = self.parser_for(path).ok_or_else(|| ParseError::Unsupported {
            path: path.to_path_buf(),
            supported: self.supported_list(),
        })?;
        debug!("Loading {} with parser '{}'", path.display(), parser.name());
        let doc = parser.parse(path, options).await?;
        info!(
            "Loaded {} → {} pages, {} words, {} images",
            doc.id(),
            doc.page_count(),
            doc.word_count(),
            doc.images().len()
        );
        Ok(doc)
    }

    /// Recursively collect supported files under `dir`, sorted by path.
    pub async fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, AnalyzerError> {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(AnalyzerError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| AnalyzerError::Internal(format!("directory walk panicked: {e}")))?;
        let mut found: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| self.parser_for(path).is_some())
            .collect();
        found.sort();

        if found.is_empty() {
            return Err(AnalyzerError::NoDocuments {
                path: dir.to_path_buf(),
                extensions: self.supported_list(),
            });
        }
        info!("Discovered {} documents in {}", found.len(), dir.display());
        Ok(found)
    }
}

/// Every regular file below `root`. Symlinks are not followed and
/// unreadable entries are skipped.
fn walk_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SourceFormat;

    struct Fake(&'static str, &'static [&'static str]);

    #[async_trait]
    impl DocumentParser for Fake {
        fn name(&self) -> &str {
            self.0
        }
        fn extensions(&self) -> &[&'static str] {
            self.1
        }
        async fn parse(&self, path: &Path, _: &LoadOptions) -> Result<Document, ParseError> {
            Ok(Document::new(path, SourceFormat::Text, "fake", 1))
        }
    }

    #[test]
    fn conflicting_extension_is_rejected() {
        let mut reg = ParserRegistry::new();
        reg.register(Arc::new(Fake("a", &["txt"]))).unwrap();
        let err = reg.register(Arc::new(Fake("b", &["rst", "TXT"]))).unwrap_err();
        let RegistryError::ExtensionConflict {
            extension,
            existing,
            rejected,
        } = err;
        assert_eq!((extension.as_str(), existing.as_str(), rejected.as_str()), ("txt", "a", "b"));
        // Nothing from the rejected parser was registered.
        assert_eq!(reg.supported_extensions(), ["txt"]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = ParserRegistry::with_defaults();
        assert_eq!(reg.parser_for(Path::new("Paper.PDF")).unwrap().name(), "pdf");
        assert_eq!(reg.parser_for(Path::new("notes.Md")).unwrap().name(), "text");
        assert!(reg.parser_for(Path::new("data.csv")).is_none());
        assert!(reg.parser_for(Path::new("README")).is_none());
        assert_eq!(reg.supported_extensions(), ["markdown", "md", "pdf", "txt"]);
    }

    #[tokio::test]
    async fn unsupported_extension_is_a_parse_error() {
        let reg = ParserRegistry::with_defaults();
        let err = reg
            .load(Path::new("table.csv"), &LoadOptions::default())
            .await
            .unwrap_err();
        match err {
            ParseError::Unsupported { supported, .. } => assert!(supported.contains(".pdf")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn discover_walks_recursively_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.md"), "# B").unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();
        std::fs::write(dir.path().join("nested/c.TXT"), "C").unwrap();
        std::fs::write(dir.path().join("skip.csv"), "x").unwrap();

        let reg = ParserRegistry::with_defaults();
        let files = reg.discover(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.txt", "b.md", "nested/c.TXT"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn discover_does_not_follow_symlinked_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("elsewhere.md"), "# E").unwrap();
        std::fs::write(dir.path().join("here.md"), "# H").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let files = ParserRegistry::with_defaults().discover(dir.path()).await.unwrap();
        assert_eq!(files, [dir.path().join("here.md")]);
    }

    #[tokio::test]
    async fn discover_errors() {
        let reg = ParserRegistry::with_defaults();
        assert!(matches!(
            reg.discover(Path::new("/no/such/dir")).await,
            Err(AnalyzerError::DirectoryNotFound { .. })
        ));
        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            reg.discover(empty.path()).await,
            Err(AnalyzerError::NoDocuments { .. })
        ));
    }
}
