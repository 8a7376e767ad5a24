//! Response parsing: raw engine text → schema fields.
//!
//! Models are asked for a JSON object, but in practice reply with anything
//! from clean JSON to fenced JSON wrapped in prose, a function-call envelope,
//! or Markdown sections with bold labels. Two strategies run in order:
//!
//! 1. **Structured**: find a JSON object (whole reply, fenced block, or the
//!    outermost `{…}`), unwrap a `{name, arguments}` envelope, then map keys
//!    to schema fields by name or known alias.
//! 2. **Permissive**: scan lines for schema labels (`## Summary`,
//!    `**Problem:**`, `Key contributions:`) and capture the text up to the
//!    next label.
//!
//! Permissive results only fill fields the structured pass left missing.
//! Nothing is ever invented: an unresolved field stays `Missing`.

use crate::error::ValidationError;
use crate::output::{AnalysisFields, FieldValue};
use crate::prompts::{FieldKind, PromptSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Which strategy produced the final field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Structured,
    Permissive,
    /// Structured pass plus permissive gap filling.
    Combined,
}

/// A response that passed validation.
#[derive(Debug, Clone)]
pub struct ParsedAnalysis {
    pub fields: AnalysisFields,
    pub method: ExtractionMethod,
    /// Resolved / total.
    pub completeness: f64,
}

#[derive(Debug, Clone)]
pub struct ResultParser {
    min_field_fraction: f64,
}

impl Default for ResultParser {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ResultParser {
    /// `min_field_fraction` is clamped to `[0, 1]`.
    pub fn new(min_field_fraction: f64) -> Self {
        Self {
            min_field_fraction: min_field_fraction.clamp(0.0, 1.0),
        }
    }

    pub fn min_field_fraction(&self) -> f64 {
        self.min_field_fraction
    }

    /// Extract and validate fields from an engine reply.
    pub fn parse(&self, content: &str, spec: &PromptSpec) -> Result<ParsedAnalysis, ValidationError> {
        let structured = extract_structured(content, spec);
        let (fields, method) = match structured {
            Some(fields) if fields.missing().is_empty() => (fields, ExtractionMethod::Structured),
            Some(mut fields) => {
                let before = fields.resolved();
                fields.fill_from(&extract_permissive(content, spec));
                let method = if fields.resolved() > before {
                    ExtractionMethod::Combined
                } else {
                    ExtractionMethod::Structured
                };
                (fields, method)
            }
            None => (extract_permissive(content, spec), ExtractionMethod::Permissive),
        };
        self.validate(fields, method, spec)
    }

    fn validate(
        &self,
        mut fields: AnalysisFields,
        method: ExtractionMethod,
        spec: &PromptSpec,
    ) -> Result<ParsedAnalysis, ValidationError> {
        conform_enums(&mut fields, spec);
        let total = fields.len();
        let resolved = fields.resolved();
        let completeness = if total == 0 {
            1.0
        } else {
            resolved as f64 / total as f64
        };
        let required_ok = spec
            .fields
            .iter()
            .filter(|f| f.required)
            .all(|f| fields.get(f.name).is_some_and(FieldValue::is_present));

        debug!(?method, resolved, total, "response parsed");
        if required_ok && completeness >= self.min_field_fraction {
            Ok(ParsedAnalysis {
                fields,
                method,
                completeness,
            })
        } else {
            Err(ValidationError {
                missing: fields.missing(),
                total,
                partial: fields,
            })
        }
    }
}

/// Replace each enum value by its canonical option, or mark it `Missing`
/// when it matches none of them.
fn conform_enums(fields: &mut AnalysisFields, spec: &PromptSpec) {
    for field in &spec.fields {
        let FieldKind::Enum(options) = &field.kind else {
            continue;
        };
        let Some(raw) = fields.get(field.name).and_then(FieldValue::as_str) else {
            continue;
        };
        let value = raw.trim_matches(|c: char| c == '"' || c == '\'' || c == '.').trim();
        let conformed = match options.iter().find(|o| o.eq_ignore_ascii_case(value)) {
            Some(option) => FieldValue::Present(option.to_string()),
            None => {
                debug!(field = field.name, value = raw, "value outside the allowed set");
                FieldValue::Missing
            }
        };
        fields.set(field.name, conformed);
    }
}

// ── Structured strategy ──────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n?(.*?)```").unwrap());

/// Map a JSON reply onto `spec`. `None` when no JSON object could be found.
pub fn extract_structured(content: &str, spec: &PromptSpec) -> Option<AnalysisFields> {
    let object = find_json_object(content)?;
    let object = unwrap_envelope(object);
    let object = descend_to_fields(object, spec);

    let by_key: HashMap<String, &Value> = object.iter().map(|(k, v)| (normalize_key(k), v)).collect();
    let mut fields = AnalysisFields::empty_for(spec);
    for field in &spec.fields {
        let candidates = std::iter::once(field.name).chain(field.aliases.iter().copied());
        let value = candidates
            .filter_map(|key| by_key.get(&normalize_key(key)))
            .map(|v| value_to_text(v))
            .find(|v| v.is_present());
        if let Some(v) = value {
            fields.set(field.name, v);
        }
    }
    Some(fields)
}

fn find_json_object(content: &str) -> Option<Map<String, Value>> {
    let trimmed = content.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
        return Some(map);
    }
    for caps in RE_FENCE.captures_iter(content) {
        if let Ok(Value::Object(map)) = serde_json::from_str(caps[1].trim()) {
            return Some(map);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Unwrap `{"name": .., "arguments": "<json>"}` and `{"function_call": {..}}`.
fn unwrap_envelope(mut object: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Object(inner)) = object.remove("function_call") {
        return unwrap_envelope(inner);
    }
    if object.contains_key("name") && object.contains_key("arguments") {
        match object.get("arguments") {
            Some(Value::String(s)) => {
                if let Ok(Value::Object(map)) = serde_json::from_str(s) {
                    return map;
                }
            }
            Some(Value::Object(map)) => return map.clone(),
            _ => {}
        }
    }
    object
}

/// Follow a single wrapper key (`{"analysis": {...}}`) when the top level
/// holds none of the schema keys.
fn descend_to_fields(object: Map<String, Value>, spec: &PromptSpec) -> Map<String, Value> {
    let known = |map: &Map<String, Value>| {
        map.keys().any(|k| {
            let k = normalize_key(k);
            spec.fields.iter().any(|f| {
                normalize_key(f.name) == k || f.aliases.iter().any(|a| normalize_key(a) == k)
            })
        })
    };
    if known(&object) || object.len() != 1 {
        return object;
    }
    match object.into_iter().next() {
        Some((_, Value::Object(inner))) if known(&inner) => inner,
        Some((k, v)) => Map::from_iter([(k, v)]),
        None => Map::new(),
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn value_to_text(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Missing,
        Value::String(s) => FieldValue::from_text(s),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| value_to_text(item).as_str().map(str::to_string))
                .collect();
            FieldValue::from_text(&parts.join("\n"))
        }
        Value::Object(_) => FieldValue::from_text(&value.to_string()),
        Value::Bool(b) => FieldValue::Present(b.to_string()),
        Value::Number(n) => FieldValue::Present(n.to_string()),
    }
}

// ── Permissive strategy ──────────────────────────────────────────────────────

/// Label line matcher for one schema.
struct LabelScanner {
    regex: Option<Regex>,
    labels: HashMap<String, &'static str>,
}

impl LabelScanner {
    fn new(spec: &PromptSpec) -> Self {
        let mut labels: HashMap<String, &'static str> = HashMap::new();
        for field in &spec.fields {
            for key in std::iter::once(field.name).chain(field.aliases.iter().copied()) {
                labels.entry(label_key(key)).or_insert(field.name);
            }
        }

        let mut alternatives: Vec<String> = labels
            .keys()
            .map(|l| {
                l.split(' ')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"[\s_]+")
            })
            .collect();
        // Longest first, so "key contributions" beats "contributions".
        alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

        let pattern = format!(
            r#"(?i)^\s*(?:[-*+>]\s+)?(?P<hash>#{{1,6}}\s*)?(?P<open>\*\*|__)?\s*(?:\d+(?:\.\d+)*[.)]?\s+)?["']?(?P<label>{})["']?\s*(?P<close1>\*\*|__)?\s*(?P<colon>[:：])?\s*(?P<close2>\*\*|__)?\s*(?P<rest>.*)$"#,
            alternatives.join("|")
        );
        Self {
            regex: Regex::new(&pattern).ok(),
            labels,
        }
    }

    /// `(field, inline text)` when `line` is a label line.
    fn match_line<'a>(&self, line: &'a str) -> Option<(&'static str, &'a str)> {
        let caps = self.regex.as_ref()?.captures(line)?;
        let rest = caps.name("rest").map_or("", |m| m.as_str());
        let colon = caps.name("colon").is_some();
        let bold = caps.name("open").is_some()
            && (caps.name("close1").is_some() || caps.name("close2").is_some());
        let heading = caps.name("hash").is_some() && rest.trim().is_empty();
        if !(colon || bold || heading) {
            return None;
        }
        let field = *self.labels.get(&label_key(caps.name("label")?.as_str()))?;
        Some((field, rest))
    }
}

fn label_key(label: &str) -> String {
    label
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_capture(text: &str) -> String {
    let t = text.trim();
    let t = t.trim_end_matches(',').trim();
    let t = t
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(t);
    t.trim().to_string()
}

/// Label scan over free text. Always returns the full key set.
pub fn extract_permissive(content: &str, spec: &PromptSpec) -> AnalysisFields {
    let scanner = LabelScanner::new(spec);
    let mut fields = AnalysisFields::empty_for(spec);
    let mut current: Option<(&'static str, Vec<&str>)> = None;

    for line in content.lines() {
        if let Some((field, rest)) = scanner.match_line(line) {
            flush_capture(current.take(), &mut fields);
            let mut lines = Vec::new();
            if !rest.trim().is_empty() {
                lines.push(rest);
            }
            current = Some((field, lines));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    flush_capture(current.take(), &mut fields);
    fields
}

/// Store a finished capture unless an earlier section already set the field.
fn flush_capture(capture: Option<(&'static str, Vec<&str>)>, fields: &mut AnalysisFields) {
    if let Some((name, lines)) = capture {
        let value = FieldValue::from_text(&clean_capture(&lines.join("\n")));
        if value.is_present() && !fields.get(name).is_some_and(FieldValue::is_present) {
            fields.set(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{FieldKind, PromptVersion, SchemaField};
    use serde_json::json;

    fn basic() -> &'static PromptSpec {
        PromptVersion::En.spec()
    }

    fn full_json() -> Value {
        json!({
            "title": "Attention Is All You Need",
            "summary": "Introduces the Transformer.",
            "problem": "Recurrent models are slow to train.",
            "solution": "Self-attention only.",
            "limitations": "Quadratic cost in sequence length.",
            "key_contributions": "Multi-head attention; positional encodings.",
        })
    }

    #[test]
    fn exact_json_round_trips() {
        let input = full_json();
        let parsed = ResultParser::default()
            .parse(&input.to_string(), basic())
            .unwrap();
        assert_eq!(parsed.method, ExtractionMethod::Structured);
        assert_eq!(parsed.completeness, 1.0);
        for (k, v) in parsed.fields.iter() {
            assert_eq!(v.as_str(), input[k].as_str(), "field {k}");
        }
        assert_eq!(serde_json::to_value(&parsed.fields).unwrap(), input);
    }

    #[test]
    fn fenced_json_inside_prose() {
        let content = format!(
            "Sure! Here is the analysis:\n\n```json\n{}\n```\nLet me know.",
            serde_json::to_string_pretty(&full_json()).unwrap()
        );
        let parsed = ResultParser::default().parse(&content, basic()).unwrap();
        assert_eq!(parsed.fields.get("title").and_then(FieldValue::as_str), Some("Attention Is All You Need"));
    }

    #[test]
    fn function_call_envelope_is_unwrapped() {
        let envelope = json!({
            "name": "analyze_paper",
            "arguments": full_json().to_string(),
        });
        let parsed = ResultParser::default()
            .parse(&envelope.to_string(), basic())
            .unwrap();
        assert_eq!(parsed.method, ExtractionMethod::Structured);
        assert_eq!(
            parsed.fields.get("limitations").and_then(FieldValue::as_str),
            Some("Quadratic cost in sequence length.")
        );
    }

    #[test]
    fn aliases_and_non_string_values() {
        let content = json!({
            "Title": "T",
            "paper_overview": "S",
            "research problem": "P",
            "methodology": "M",
            "weaknesses": ["w1", "w2"],
            "contributions": ["c1", 2],
        })
        .to_string();
        let parsed = ResultParser::default().parse(&content, basic()).unwrap();
        let get = |k| parsed.fields.get(k).and_then(FieldValue::as_str);
        assert_eq!(get("summary"), Some("S"));
        assert_eq!(get("problem"), Some("P"));
        assert_eq!(get("solution"), Some("M"));
        assert_eq!(get("limitations"), Some("w1\nw2"));
        assert_eq!(get("key_contributions"), Some("c1\n2"));
    }

    #[test]
    fn wrapper_object_is_descended() {
        let content = json!({ "analysis": full_json() }).to_string();
        assert!(ResultParser::default().parse(&content, basic()).is_ok());
    }

    #[test]
    fn permissive_recovers_decorated_sections_in_any_order() {
        let content = "\
Here is my analysis of the paper.

## Problem
Training recurrent networks is slow.

**Summary**: The paper introduces the Transformer.

Key Contributions:
- Multi-head attention
- Positional encodings

# TITLE
Attention Is All You Need

**Limitations:** Quadratic memory.
### 4. Solution
Replace recurrence with self-attention.
";
        let parsed = ResultParser::default().parse(content, basic()).unwrap();
        assert_eq!(parsed.method, ExtractionMethod::Permissive);
        let get = |k| parsed.fields.get(k).and_then(FieldValue::as_str);
        assert_eq!(get("title"), Some("Attention Is All You Need"));
        assert_eq!(get("summary"), Some("The paper introduces the Transformer."));
        assert_eq!(get("problem"), Some("Training recurrent networks is slow."));
        assert_eq!(get("solution"), Some("Replace recurrence with self-attention."));
        assert_eq!(get("limitations"), Some("Quadratic memory."));
        assert_eq!(
            get("key_contributions"),
            Some("- Multi-head attention\n- Positional encodings")
        );
    }

    #[test]
    fn prose_mentioning_a_label_is_not_a_section() {
        let fields = extract_permissive("The summary of results shows gains.", basic());
        assert_eq!(fields.resolved(), 0);
    }

    #[test]
    fn combined_fills_gaps_from_text() {
        let mut partial = full_json();
        partial.as_object_mut().unwrap().remove("limitations");
        let content = format!("{partial}\n\nLimitations: Needs lots of data.");
        let parsed = ResultParser::default().parse(&content, basic()).unwrap();
        assert_eq!(parsed.method, ExtractionMethod::Combined);
        assert_eq!(
            parsed.fields.get("limitations").and_then(FieldValue::as_str),
            Some("Needs lots of data.")
        );
    }

    #[test]
    fn missing_fields_fail_validation_with_partial() {
        let content = json!({"title": "T", "summary": "  ", "problem": "P"}).to_string();
        let err = ResultParser::default().parse(&content, basic()).unwrap_err();
        assert_eq!(err.total, 6);
        assert_eq!(err.missing, ["summary", "solution", "limitations", "key_contributions"]);
        assert_eq!(err.partial.get("title").and_then(FieldValue::as_str), Some("T"));
    }

    #[test]
    fn garbage_fails_without_inventing_values() {
        let err = ResultParser::default()
            .parse("I cannot help with that.", basic())
            .unwrap_err();
        assert_eq!(err.missing.len(), 6);
        assert_eq!(err.partial.resolved(), 0);
    }

    #[test]
    fn optional_fields_respect_min_fraction() {
        let mut spec = basic().clone();
        spec.fields.push(SchemaField {
            required: false,
            ..SchemaField::text("notes", "Free notes", &[])
        });
        let content = full_json().to_string();

        assert!(ResultParser::new(1.0).parse(&content, &spec).is_err());
        let parsed = ResultParser::new(0.8).parse(&content, &spec).unwrap();
        assert!((parsed.completeness - 6.0 / 7.0).abs() < 1e-9);
    }

    fn with_novelty() -> PromptSpec {
        let mut spec = basic().clone();
        spec.fields.push(SchemaField {
            kind: FieldKind::Enum(vec!["high", "low"]),
            ..SchemaField::text("novelty", "How novel the work is", &[])
        });
        spec
    }

    #[test]
    fn enum_values_are_canonicalised() {
        let mut content = full_json();
        content["novelty"] = json!(" HIGH. ");
        let parsed = ResultParser::default()
            .parse(&content.to_string(), &with_novelty())
            .unwrap();
        assert_eq!(parsed.fields.get("novelty").and_then(FieldValue::as_str), Some("high"));
    }

    #[test]
    fn enum_value_outside_the_set_is_missing() {
        let mut content = full_json();
        content["novelty"] = json!("banana");
        let err = ResultParser::default()
            .parse(&content.to_string(), &with_novelty())
            .unwrap_err();
        assert_eq!(err.missing, ["novelty"]);
        assert_eq!(err.partial.get("novelty"), Some(&FieldValue::Missing));
        assert_eq!(err.partial.resolved(), 6);
    }
}
