//! Output types: the per-document [`AnalysisResult`] and its field map.

use crate::error::{AnalyzerError, ErrorDetail, FailureCategory};
use crate::prompts::{PromptSpec, PromptVersion};
use crate::quality::QualityIssue;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;

/// The value of one schema field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldValue {
    Present(String),
    /// Unresolved; serialised as `null`.
    #[default]
    Missing,
}

impl FieldValue {
    /// `Present` for non-blank text (trimmed), `Missing` otherwise.
    pub fn from_text(text: &str) -> Self {
        let t = text.trim();
        if t.is_empty() {
            FieldValue::Missing
        } else {
            FieldValue::Present(t.to_string())
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Present(s) => Some(s),
            FieldValue::Missing => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Present(v) => s.serialize_str(v),
            FieldValue::Missing => s.serialize_none(),
        }
    }
}

/// Schema fields in schema order.
///
/// Serialises as a JSON object so it can be flattened into the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisFields {
    entries: Vec<(String, FieldValue)>,
}

impl AnalysisFields {
    /// Every field of `spec`, all `Missing`.
    pub fn empty_for(spec: &PromptSpec) -> Self {
        Self {
            entries: spec
                .field_names()
                .map(|n| (n.to_string(), FieldValue::Missing))
                .collect(),
        }
    }

    /// Overwrite `name` if it exists; unknown names are ignored so the key
    /// set always matches the schema the map was created for.
    pub fn set(&mut self, name: &str, value: FieldValue) -> bool {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => {
                slot.1 = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolved(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_present()).count()
    }

    /// Names of unresolved fields, in order.
    pub fn missing(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.is_present())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Fill every `Missing` slot from `other` where `other` has a value.
    pub fn fill_from(&mut self, other: &AnalysisFields) {
        for (name, value) in &mut self.entries {
            if value.is_present() {
                continue;
            }
            if let Some(v @ FieldValue::Present(_)) = other.get(name) {
                *value = v.clone();
            }
        }
    }
}

impl Serialize for AnalysisFields {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
    Failed,
}

/// Which engine produced (or last attempted) the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    Primary,
    Fallback,
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineRole::Primary => "primary",
            EngineRole::Fallback => "fallback",
        })
    }
}

/// Per-document counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisMetrics {
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Engine calls made, across both engines and both call styles.
    pub attempts: u32,
    /// Resolved fields / schema fields, in `[0, 1]`.
    pub completeness_score: f64,
}

/// The outcome of one document's flow.
///
/// Completed results carry every schema key with a value; failed results
/// carry every schema key too (usually `null`) plus an [`ErrorDetail`].
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub document_id: String,
    #[serde(flatten)]
    pub fields: AnalysisFields,
    pub status: AnalysisStatus,
    pub engine_used: Option<EngineRole>,
    pub error_detail: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_error: Option<String>,
    pub prompt_version: PromptVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub metrics: AnalysisMetrics,
    /// Advisory findings on the input and the answer; never affect `status`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quality_issues: Vec<QualityIssue>,
}

impl AnalysisResult {
    pub fn completed(
        document_id: impl Into<String>,
        fields: AnalysisFields,
        prompt_version: PromptVersion,
        engine: EngineRole,
    ) -> Self {
        let mut metrics = AnalysisMetrics::default();
        if !fields.is_empty() {
            metrics.completeness_score = fields.resolved() as f64 / fields.len() as f64;
        }
        Self {
            document_id: document_id.into(),
            fields,
            status: AnalysisStatus::Completed,
            engine_used: Some(engine),
            error_detail: None,
            primary_error: None,
            prompt_version,
            model_used: None,
            metrics,
            quality_issues: Vec::new(),
        }
    }

    /// A failed result with every field of `spec` marked missing.
    pub fn failed(
        document_id: impl Into<String>,
        spec: &PromptSpec,
        engine: Option<EngineRole>,
        detail: ErrorDetail,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            fields: AnalysisFields::empty_for(spec),
            status: AnalysisStatus::Failed,
            engine_used: engine,
            error_detail: Some(detail),
            primary_error: None,
            prompt_version: spec.version,
            model_used: None,
            metrics: AnalysisMetrics::default(),
            quality_issues: Vec::new(),
        }
    }

    /// Replace the all-missing fields of a failed result with a partial set.
    pub fn with_partial_fields(mut self, fields: AnalysisFields) -> Self {
        if !fields.is_empty() {
            self.metrics.completeness_score = fields.resolved() as f64 / fields.len() as f64;
        }
        self.fields = fields;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == AnalysisStatus::Completed
    }

    pub fn failure_category(&self) -> Option<FailureCategory> {
        self.error_detail.as_ref().map(|d| d.category)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    /// Typed view for single-document callers.
    pub fn into_result(self) -> Result<AnalysisResult, AnalyzerError> {
        match (&self.status, &self.error_detail) {
            (AnalysisStatus::Failed, Some(detail)) => Err(AnalyzerError::AnalysisFailed {
                document_id: self.document_id.clone(),
                category: detail.category,
                message: detail.message.clone(),
            }),
            (AnalysisStatus::Failed, None) => Err(AnalyzerError::Internal(format!(
                "result for '{}' failed without a cause",
                self.document_id
            ))),
            (AnalysisStatus::Completed, _) => Ok(self),
        }
    }
}
