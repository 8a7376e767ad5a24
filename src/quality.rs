//! Advisory quality checks on inputs and analyses.
//!
//! None of these change a result's status. A model that answers `N/A` to
//! every field still passes schema validation; the issues found here are
//! attached to the result and logged so callers can decide what to do.

use crate::document::Document;
use crate::output::AnalysisFields;
use serde::Serialize;
use std::fmt;

/// Field values shorter than this (in chars, trimmed) are flagged.
pub const MIN_FIELD_CHARS: usize = 10;
/// Completeness below this is flagged.
pub const MIN_COMPLETENESS: f64 = 0.5;
/// Bodies shorter than this (in chars, trimmed) are flagged.
pub const MIN_BODY_CHARS: usize = 50;
pub const MIN_BODY_WORDS: usize = 100;
pub const MIN_BODY_LINES: usize = 5;

/// Whole-value answers that stand in for "no answer".
const PLACEHOLDERS: [&str; 6] = [
    "n/a",
    "na",
    "none",
    "null",
    "not provided",
    "not available",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    /// A field value below [`MIN_FIELD_CHARS`].
    TooShort,
    /// A field answered with a placeholder such as `N/A`.
    Placeholder,
    LowCompleteness,
    /// The loaded body is nearly empty.
    ShortContent,
    LowWordCount,
    /// Fewer than [`MIN_BODY_LINES`] lines of text.
    LittleStructure,
}

/// One advisory finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityIssue {
    pub kind: QualityIssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl QualityIssue {
    fn new(kind: QualityIssueKind, field: Option<&str>, message: String) -> Self {
        Self {
            kind,
            field: field.map(str::to_string),
            message,
        }
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn is_placeholder(value: &str) -> bool {
    let norm = value
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    PLACEHOLDERS.contains(&norm.as_str())
}

/// Flag placeholder answers, very short fields and low completeness.
///
/// Missing fields are not reported here; validation already covers them.
pub fn review_analysis(fields: &AnalysisFields, completeness: f64) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    for (name, value) in fields.iter() {
        let Some(text) = value.as_str() else {
            continue;
        };
        if is_placeholder(text) {
            issues.push(QualityIssue::new(
                QualityIssueKind::Placeholder,
                Some(name),
                format!("field '{name}' holds placeholder text '{}'", text.trim()),
            ));
        } else if text.trim().chars().count() < MIN_FIELD_CHARS {
            issues.push(QualityIssue::new(
                QualityIssueKind::TooShort,
                Some(name),
                format!("field '{name}' is shorter than {MIN_FIELD_CHARS} characters"),
            ));
        }
    }
    if completeness < MIN_COMPLETENESS {
        issues.push(QualityIssue::new(
            QualityIssueKind::LowCompleteness,
            None,
            format!("completeness {completeness:.2} is below {MIN_COMPLETENESS}"),
        ));
    }
    issues
}

/// Sanity checks on a loaded document before it is sent to an engine.
pub fn review_document(document: &Document) -> Vec<QualityIssue> {
    let body = document.body();
    let mut issues = Vec::new();
    if body.trim().chars().count() < MIN_BODY_CHARS {
        issues.push(QualityIssue::new(
            QualityIssueKind::ShortContent,
            None,
            format!("document text is shorter than {MIN_BODY_CHARS} characters"),
        ));
    }
    let words = document.word_count();
    if words < MIN_BODY_WORDS {
        issues.push(QualityIssue::new(
            QualityIssueKind::LowWordCount,
            None,
            format!("document has {words} words (fewer than {MIN_BODY_WORDS})"),
        ));
    }
    if body.lines().count() < MIN_BODY_LINES {
        issues.push(QualityIssue::new(
            QualityIssueKind::LittleStructure,
            None,
            format!("document has fewer than {MIN_BODY_LINES} lines"),
        ));
    }
    issues
}
