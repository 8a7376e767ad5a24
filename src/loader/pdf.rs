//! PDF parser: text extractor → header/footer stripping → cleanup → join.

use super::{DocumentParser, LoadOptions};
use crate::document::{Document, SourceFormat};
use crate::error::ParseError;
use crate::pipeline::clean::{clean_page_text, join_pages};
use crate::pipeline::extract::{ExtractOptions, TextExtractor};
use crate::pipeline::input;
use crate::pipeline::strip::HeaderFooterStripper;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct PdfParser {
    extractor: Arc<dyn TextExtractor>,
}

impl PdfParser {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl DocumentParser for PdfParser {
    fn name(&self) -> &str {
        "pdf"
    }

    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    async fn parse(&self, path: &Path, options: &LoadOptions) -> Result<Document, ParseError> {
        let file_size = input::check_pdf(path).await?;

        let extract_options = ExtractOptions {
            password: options.password.clone(),
            extract_images: options.extract_images,
            max_image_bytes: options.max_image_bytes,
        };
        let extracted = self.extractor.extract(path, &extract_options).await?;
        if extracted.pages.is_empty() {
            return Err(ParseError::Empty {
                path: path.to_path_buf(),
            });
        }
        let page_count = extracted.pages.len();

        let mut texts = Vec::with_capacity(page_count);
        let mut images = Vec::new();
        for page in extracted.pages {
            texts.push(page.text);
            images.extend(page.images);
        }

        let texts = if options.strip_headers_footers {
            HeaderFooterStripper::new(options.strip).strip(&texts)
        } else {
            texts
        };
        let cleaned: Vec<String> = texts.iter().map(|t| clean_page_text(t)).collect();
        let body = join_pages(&cleaned);
        if body.is_empty() {
            return Err(ParseError::Empty {
                path: path.to_path_buf(),
            });
        }
        debug!(
            "{} via {}: {} pages → {} chars",
            path.display(),
            self.extractor.name(),
            page_count,
            body.len()
        );

        let mut metadata = extracted.metadata;
        metadata.file_size = file_size;
        Ok(Document::new(path, SourceFormat::Pdf, body, page_count)
            .with_images(images)
            .with_metadata(metadata))
    }
}
