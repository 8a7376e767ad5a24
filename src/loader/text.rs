//! Plain-text and Markdown parser.
//!
//! Text is decoded as UTF-8, falling back to Latin-1 (every byte maps to a
//! code point, so decoding never fails). Text sources have no pages, so no
//! header/footer stripping is applied.

use super::{extension_of, DocumentParser, LoadOptions};
use crate::document::{guess_title, Document, DocumentMetadata, SourceFormat};
use crate::error::ParseError;
use crate::pipeline::clean::clean_plain_text;
use crate::pipeline::input;
use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct TextParser;

impl TextParser {
    pub fn new() -> Self {
        Self
    }
}

/// UTF-8, or Latin-1 when the bytes are not valid UTF-8.
pub fn decode_text(bytes: Vec<u8>) -> (String, bool) {
    match String::from_utf8(bytes) {
        Ok(s) => (s, false),
        Err(e) => (e.into_bytes().iter().map(|&b| b as char).collect(), true),
    }
}

#[async_trait]
impl DocumentParser for TextParser {
    fn name(&self) -> &str {
        "text"
    }

    fn extensions(&self) -> &[&'static str] {
        &["txt", "md", "markdown"]
    }

    async fn parse(&self, path: &Path, _options: &LoadOptions) -> Result<Document, ParseError> {
        let bytes = input::read_bytes(path).await?;
        let file_size = bytes.len() as u64;

        let (raw, fell_back) = decode_text(bytes);
        if fell_back {
            warn!("{} is not valid UTF-8, decoded as Latin-1", path.display());
        }

        let body = clean_plain_text(&raw);
        if body.is_empty() {
            return Err(ParseError::Empty {
                path: path.to_path_buf(),
            });
        }

        let format = match extension_of(path).as_deref() {
            Some("md" | "markdown") => SourceFormat::Markdown,
            _ => SourceFormat::Text,
        };
        let metadata = DocumentMetadata {
            title: guess_title(&body),
            file_size,
            ..Default::default()
        };
        Ok(Document::new(path, format, body, 1).with_metadata(metadata))
    }
}
