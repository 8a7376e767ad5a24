//! Input validation: turn a user-supplied path into a readable local file.
//!
//! Every parser goes through here first so that a missing file, a directory
//! or a permission problem is reported as the same [`ParseError`] variant
//! regardless of format, before any backend (pdfium) sees the path.

use crate::error::ParseError;
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Magic bytes at the start of every PDF.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

fn map_io(path: &Path, e: std::io::Error) -> ParseError {
    match e.kind() {
        ErrorKind::NotFound => ParseError::NotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => ParseError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ParseError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    }
}

/// Check that `path` is an existing regular file and return its size.
pub async fn check_readable(path: &Path) -> Result<u64, ParseError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| map_io(path, e))?;
    if !meta.is_file() {
        return Err(ParseError::NotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(meta.len())
}

/// Read the whole file.
pub async fn read_bytes(path: &Path) -> Result<Vec<u8>, ParseError> {
    check_readable(path).await?;
    let bytes = tokio::fs::read(path).await.map_err(|e| map_io(path, e))?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Validate that `path` opens and starts with the PDF magic bytes.
///
/// Returns the file size. Catching non-PDFs here gives a `Corrupt` error
/// with the offending bytes rather than an opaque pdfium failure.
pub async fn check_pdf(path: &Path) -> Result<u64, ParseError> {
    let size = check_readable(path).await?;
    if size == 0 {
        return Err(ParseError::Empty {
            path: path.to_path_buf(),
        });
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| map_io(path, e))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) if &magic == PDF_MAGIC => {}
        Ok(_) => {
            return Err(ParseError::Corrupt {
                path: path.to_path_buf(),
                format: "PDF".into(),
                detail: format!("bad magic bytes {magic:02x?}"),
            })
        }
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(ParseError::Corrupt {
                path: path.to_path_buf(),
                format: "PDF".into(),
                detail: format!("file is only {size} bytes"),
            })
        }
        Err(e) => return Err(map_io(path, e)),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(size)
}
