//! Per-page text (and optionally image) extraction from PDFs via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks while parsing. Every call runs on tokio's blocking pool
//! so worker threads keep servicing engine calls of other documents.
//!
//! The [`TextExtractor`] trait is the seam the PDF parser depends on, so the
//! loader can be exercised without a pdfium binary.

use crate::document::{DocumentMetadata, ExtractedImage};
use crate::error::ParseError;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an existing pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Text and images of one page, in reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    /// 0-based.
    pub index: usize,
    pub text: String,
    pub images: Vec<ExtractedImage>,
}

/// Everything pulled out of one PDF.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPages {
    pub pages: Vec<PageContent>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub password: Option<String>,
    pub extract_images: bool,
    /// Encoded images larger than this are skipped.
    pub max_image_bytes: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            password: None,
            extract_images: false,
            max_image_bytes: 1024 * 1024,
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, path: &Path, options: &ExtractOptions)
        -> Result<ExtractedPages, ParseError>;
}

/// [`TextExtractor`] backed by pdfium.
///
/// The library is located in this order: explicit path, `PDFIUM_LIB_PATH`,
/// the current directory, then the system library search path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    library_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }
}

#[async_trait]
impl TextExtractor for PdfiumExtractor {
    fn name(&self) -> &str {
        "pdfium"
    }

    async fn extract(
        &self,
        path: &Path,
        options: &ExtractOptions,
    ) -> Result<ExtractedPages, ParseError> {
        let path = path.to_path_buf();
        let options = options.clone();
        let library = self.library_path.clone();

        tokio::task::spawn_blocking(move || extract_blocking(library.as_deref(), &path, &options))
            .await
            .map_err(|e| ParseError::Backend(format!("extraction task panicked: {e}")))?
    }
}

fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium, ParseError> {
    let explicit = library
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from));

    let bindings = match explicit {
        Some(p) => Pdfium::bind_to_library(&p)
            .map_err(|e| ParseError::Backend(format!("{}: {e:?}", p.display())))?,
        None => Pdfium::bind_to_library(Path::new(".").join(Pdfium::pdfium_platform_library_name()))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| ParseError::Backend(format!("{e:?}")))?,
    };
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of [`PdfiumExtractor::extract`].
fn extract_blocking(
    library: Option<&Path>,
    path: &Path,
    options: &ExtractOptions,
) -> Result<ExtractedPages, ParseError> {
    let pdfium = bind_pdfium(library)?;

    let document = pdfium
        .load_pdf_from_file(path, options.password.as_deref())
        .map_err(|e| {
            let err_str = format!("{e:?}");
            if err_str.contains("Password") || err_str.contains("password") {
                ParseError::Encrypted {
                    path: path.to_path_buf(),
                }
            } else {
                ParseError::Corrupt {
                    path: path.to_path_buf(),
                    format: "PDF".into(),
                    detail: err_str,
                }
            }
        })?;

    let metadata = read_metadata(&document);
    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut out = Vec::with_capacity(pages.len() as usize);
    for (index, page) in pages.iter().enumerate() {
        let text = match page.text() {
            Ok(t) => t.all(),
            Err(e) => {
                warn!("Page {}: no text layer ({e:?})", index + 1);
                String::new()
            }
        };
        let images = if options.extract_images {
            page_images(&page, index, options.max_image_bytes)
        } else {
            Vec::new()
        };
        debug!(
            "Extracted page {} → {} chars, {} images",
            index + 1,
            text.len(),
            images.len()
        );
        out.push(PageContent {
            index,
            text,
            images,
        });
    }

    Ok(ExtractedPages {
        pages: out,
        metadata,
    })
}

fn page_images(page: &PdfPage, page_index: usize, max_bytes: usize) -> Vec<ExtractedImage> {
    let mut images = Vec::new();
    let objects = page.objects();
    for object in objects.iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let index = images.len();
        let raw = match image_object.get_raw_image() {
            Ok(img) => img,
            Err(e) => {
                warn!("Page {} image {}: decode failed ({e:?})", page_index + 1, index);
                continue;
            }
        };
        let data = match encode_png(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!("Page {} image {}: PNG encode failed ({e})", page_index + 1, index);
                continue;
            }
        };
        if data.len() > max_bytes {
            warn!(
                "Page {} image {}: {} bytes exceeds limit of {}, skipped",
                page_index + 1,
                index,
                data.len(),
                max_bytes
            );
            continue;
        }
        images.push(ExtractedImage {
            page_index,
            index,
            format: "png".into(),
            data,
        });
    }
    images
}

fn read_metadata(document: &PdfDocument) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        file_size: 0,
    }
}
