//! The normalised unit of analysis produced by the loader.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Input format of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Pdf,
    Text,
    Markdown,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Text => "text",
            SourceFormat::Markdown => "markdown",
        })
    }
}

/// An image lifted out of a PDF page, PNG-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    /// 0-based page the image was found on.
    pub page_index: usize,
    /// Position of the image among the page's image objects.
    pub index: usize,
    /// Encoding of `data`, e.g. `"png"`.
    pub format: String,
    /// Encoded image bytes. Serialised as base64.
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
}

fn serialize_base64<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(data))
}

/// Descriptive metadata; every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub file_size: u64,
}

/// A loaded document: header/footer-free body text plus optional images.
///
/// Created once per input file by the loader and never mutated afterwards;
/// fields are read through accessors.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    id: String,
    source_path: PathBuf,
    source_format: SourceFormat,
    body: String,
    page_count: usize,
    images: Vec<ExtractedImage>,
    metadata: DocumentMetadata,
}

impl Document {
    /// Build a document. `page_count` is clamped to at least 1.
    pub fn new(
        source_path: impl Into<PathBuf>,
        source_format: SourceFormat,
        body: impl Into<String>,
        page_count: usize,
    ) -> Self {
        let source_path = source_path.into();
        Self {
            id: derive_id(&source_path),
            source_path,
            source_format,
            body: body.into(),
            page_count: page_count.max(1),
            images: Vec::new(),
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_images(mut self, images: Vec<ExtractedImage>) -> Self {
        self.images = images;
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn images(&self) -> &[ExtractedImage] {
        &self.images
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

/// Stable identifier for a source path: `<stem>_<8 hex chars>`.
///
/// The digest covers the canonical path when the file exists (the path as
/// given otherwise), so `./a.pdf` and `a.pdf` share an id while two
/// `paper.pdf` files in different directories do not collide.
pub fn derive_id(path: &Path) -> String {
    let stem: String = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let short = hex::encode(&digest[..4]);
    if stem.is_empty() {
        format!("doc_{short}")
    } else {
        format!("{stem}_{short}")
    }
}

/// Guess a title from the first ten lines of plain text.
///
/// A Markdown `# ` heading wins; otherwise the first short line that is not
/// itself a heading marker.
pub fn guess_title(body: &str) -> Option<String> {
    for line in body.lines().take(10) {
        let line = line.trim();
        if let Some(heading) = line.strip_prefix("# ") {
            let heading = heading.trim();
            if !heading.is_empty() {
                return Some(heading.to_string());
            }
        } else if !line.is_empty() && !line.starts_with('#') && line.chars().count() < 100 {
            return Some(line.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_and_path_sensitive() {
        let a = derive_id(Path::new("papers/attention.pdf"));
        let b = derive_id(Path::new("papers/attention.pdf"));
        let c = derive_id(Path::new("other/attention.pdf"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("attention_"), "got: {a}");
        assert_eq!(a.len(), "attention_".len() + 8);
    }

    #[test]
    fn id_ignores_path_spelling_of_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();

        let plain = derive_id(&dir.path().join("a.pdf"));
        assert_eq!(derive_id(&dir.path().join(".").join("a.pdf")), plain);
        assert_eq!(derive_id(&dir.path().join("sub/../a.pdf")), plain);
    }

    #[test]
    fn id_sanitises_stem() {
        let id = derive_id(Path::new("my paper (v2).md"));
        assert!(id.starts_with("my_paper__v2__"), "got: {id}");
    }

    #[test]
    fn page_count_clamped_to_one() {
        let doc = Document::new("a.txt", SourceFormat::Text, "hello world", 0);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.word_count(), 2);
    }

    #[test]
    fn title_prefers_markdown_heading() {
        assert_eq!(
            guess_title("\n# Attention Is All You Need\n\nAbstract").as_deref(),
            Some("Attention Is All You Need")
        );
        assert_eq!(
            guess_title("## \nDeep Residual Learning\nmore").as_deref(),
            Some("Deep Residual Learning")
        );
        assert_eq!(guess_title(""), None);
    }

    #[test]
    fn images_serialise_as_base64() {
        let img = ExtractedImage {
            page_index: 0,
            index: 0,
            format: "png".into(),
            data: vec![1, 2, 3],
        };
        let json = serde_json::to_value(&img).unwrap();
        assert_eq!(json["data"], "AQID");
    }
}
