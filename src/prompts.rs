//! Prompt templates and output schemas, one pair per prompt version.
//!
//! A [`PromptSpec`] couples an instruction template with the ordered set of
//! fields the engine must return. Specs are built once and shared read-only
//! across concurrent flows (`&'static PromptSpec`).
//!
//! The basic schema has six fields even though older documentation calls it
//! the "5-field" analysis; the six literal names below are authoritative.

use crate::error::AnalyzerError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Placeholder replaced by the (truncated) document body.
pub const BODY_PLACEHOLDER: &str = "{paper_text}";

/// Placeholder replaced by the rendered field list.
pub const FIELDS_PLACEHOLDER: &str = "{field_list}";

/// Note appended after a body that was cut to the length limit.
pub const TRUNCATION_NOTE: &str = "[Note: Paper truncated due to length limitations]";

/// Prompt version tag selecting template language and schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PromptVersion {
    /// English, basic six-field schema.
    #[serde(rename = "EN")]
    En,
    /// English, enhanced schema (adds `research_significance`). Default.
    #[default]
    #[serde(rename = "EN_2_0")]
    En2,
    /// Chinese, basic schema.
    #[serde(rename = "ZH")]
    Zh,
    /// Chinese, enhanced schema.
    #[serde(rename = "ZH_2_0")]
    Zh2,
}

impl PromptVersion {
    pub const ALL: [PromptVersion; 4] = [
        PromptVersion::En,
        PromptVersion::En2,
        PromptVersion::Zh,
        PromptVersion::Zh2,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            PromptVersion::En => "EN",
            PromptVersion::En2 => "EN_2_0",
            PromptVersion::Zh => "ZH",
            PromptVersion::Zh2 => "ZH_2_0",
        }
    }

    pub fn language(self) -> Language {
        match self {
            PromptVersion::En | PromptVersion::En2 => Language::English,
            PromptVersion::Zh | PromptVersion::Zh2 => Language::Chinese,
        }
    }

    pub fn is_enhanced(self) -> bool {
        matches!(self, PromptVersion::En2 | PromptVersion::Zh2)
    }

    /// The shared spec for this version.
    pub fn spec(self) -> &'static PromptSpec {
        match self {
            PromptVersion::En => &EN_BASIC,
            PromptVersion::En2 => &EN_ENHANCED,
            PromptVersion::Zh => &ZH_BASIC,
            PromptVersion::Zh2 => &ZH_ENHANCED,
        }
    }
}

impl fmt::Display for PromptVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PromptVersion {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace(['-', '.'], "_");
        PromptVersion::ALL
            .into_iter()
            .find(|v| v.tag() == norm)
            .ok_or_else(|| AnalyzerError::UnknownPromptVersion(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Chinese,
}

/// Value type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text.
    String,
    /// One of a fixed set of strings (matched case-insensitively).
    Enum(Vec<&'static str>),
}

/// A named, typed slot in the analysis output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub required: bool,
    /// Alternate keys some models use for this field.
    pub aliases: &'static [&'static str],
}

impl SchemaField {
    pub const fn text(
        name: &'static str,
        description: &'static str,
        aliases: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            kind: FieldKind::String,
            description,
            required: true,
            aliases,
        }
    }
}

/// Template plus ordered output schema for one (version, language) pair.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub version: PromptVersion,
    pub language: Language,
    pub template: &'static str,
    pub fields: Vec<SchemaField>,
}

impl PromptSpec {
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// JSON-Schema object describing the expected response.
    ///
    /// Used as the function/tool parameter schema for structured calls.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": "string",
                "description": field.description,
            });
            if let FieldKind::Enum(options) = &field.kind {
                prop["enum"] = json!(options);
            }
            properties.insert(field.name.to_string(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ── Schemas ──────────────────────────────────────────────────────────────────

fn basic_fields() -> Vec<SchemaField> {
    vec![
        SchemaField::text("title", "Paper title, or a descriptive title if none is given", &[]),
        SchemaField::text(
            "summary",
            "Comprehensive summary of the paper's content",
            &["paper_overview", "overview"],
        ),
        SchemaField::text(
            "problem",
            "The research problem or challenge the paper addresses",
            &["research_problem", "challenge"],
        ),
        SchemaField::text(
            "solution",
            "The proposed solution, methodology or approach",
            &["methodology", "method", "approach"],
        ),
        SchemaField::text(
            "limitations",
            "Limitations, weaknesses or unresolved issues",
            &["limitations_analysis", "weaknesses"],
        ),
        SchemaField::text(
            "key_contributions",
            "The main contributions of the paper",
            &["contributions", "academic_contributions"],
        ),
    ]
}

fn enhanced_fields() -> Vec<SchemaField> {
    let mut fields = basic_fields();
    fields.push(SchemaField::text(
        "research_significance",
        "Research significance and impact of the work",
        &["significance", "impact"],
    ));
    fields
}

// ── Templates ────────────────────────────────────────────────────────────────

const EN_BASIC_TEMPLATE: &str = r#"Please analyze the following academic paper:

{paper_text}

You must provide meaningful analysis for ALL required fields:
{field_list}

Never leave any field empty or use "Not provided". Always provide meaningful analysis.

Respond with exactly these fields and no others, as a single valid JSON object whose keys are the field names above."#;

const EN_ENHANCED_TEMPLATE: &str = r#"Please conduct a deep analysis of the following academic paper:

{paper_text}

CRITICAL REQUIREMENTS:
- You MUST provide detailed analysis for ALL required fields
- Never leave any field empty or use "Not provided"
- When explicit information is not available, make reasonable inferences based on the paper content
- Be proactive in identifying implicit contributions and limitations
- Focus on specific technical details rather than generic statements

Required fields:
{field_list}

Respond with exactly these fields and no others, as a single valid JSON object whose keys are the field names above."#;

const ZH_BASIC_TEMPLATE: &str = r#"请分析以下学术论文：

{paper_text}

您必须为所有必需字段提供有意义的分析：
{field_list}

严禁留空任何字段或使用"Not provided"。

请仅返回一个有效的 JSON 对象，键名必须与上述字段名完全一致，不得增加或遗漏字段。"#;

const ZH_ENHANCED_TEMPLATE: &str = r#"请对以下学术论文进行深度分析：

{paper_text}

关键分析要求：
- 您必须为所有必需字段提供详细分析
- 严禁留空任何字段或使用"Not provided"
- 当论文中没有直接明确的信息时，请基于内容进行合理推断
- 主动识别隐含的贡献和局限性
- 提供具体的技术细节，避免泛泛而谈

必需字段：
{field_list}

请仅返回一个有效的 JSON 对象，键名必须与上述字段名完全一致，不得增加或遗漏字段。"#;

static EN_BASIC: Lazy<PromptSpec> = Lazy::new(|| PromptSpec {
    version: PromptVersion::En,
    language: Language::English,
    template: EN_BASIC_TEMPLATE,
    fields: basic_fields(),
});

static EN_ENHANCED: Lazy<PromptSpec> = Lazy::new(|| PromptSpec {
    version: PromptVersion::En2,
    language: Language::English,
    template: EN_ENHANCED_TEMPLATE,
    fields: enhanced_fields(),
});

static ZH_BASIC: Lazy<PromptSpec> = Lazy::new(|| PromptSpec {
    version: PromptVersion::Zh,
    language: Language::Chinese,
    template: ZH_BASIC_TEMPLATE,
    fields: basic_fields(),
});

static ZH_ENHANCED: Lazy<PromptSpec> = Lazy::new(|| PromptSpec {
    version: PromptVersion::Zh2,
    language: Language::Chinese,
    template: ZH_ENHANCED_TEMPLATE,
    fields: enhanced_fields(),
});

/// System message for structured (JSON-only) engine calls.
///
/// `{schema}` is replaced with [`PromptSpec::json_schema`].
pub const STRUCTURED_SYSTEM_PROMPT: &str = r#"You are a research paper analysis function. Reply with a single JSON object that validates against this JSON Schema and nothing else: no prose, no markdown fences.

{schema}"#;

pub fn structured_system_prompt(spec: &PromptSpec) -> String {
    STRUCTURED_SYSTEM_PROMPT.replace("{schema}", &spec.json_schema().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: [&str; 6] = [
        "title",
        "summary",
        "problem",
        "solution",
        "limitations",
        "key_contributions",
    ];

    #[test]
    fn basic_schema_has_six_literal_fields() {
        for v in [PromptVersion::En, PromptVersion::Zh] {
            let names: Vec<_> = v.spec().field_names().collect();
            assert_eq!(names, BASIC, "version {v}");
        }
    }

    #[test]
    fn enhanced_schema_adds_research_significance() {
        for v in [PromptVersion::En2, PromptVersion::Zh2] {
            let names: Vec<_> = v.spec().field_names().collect();
            assert_eq!(names.len(), 7);
            assert_eq!(&names[..6], BASIC);
            assert_eq!(names[6], "research_significance");
        }
    }

    #[test]
    fn every_template_has_both_placeholders() {
        for v in PromptVersion::ALL {
            let t = v.spec().template;
            assert!(t.contains(BODY_PLACEHOLDER), "{v} missing body placeholder");
            assert!(t.contains(FIELDS_PLACEHOLDER), "{v} missing field placeholder");
        }
    }

    #[test]
    fn version_tags_parse_loosely() {
        assert_eq!("EN_2_0".parse::<PromptVersion>().unwrap(), PromptVersion::En2);
        assert_eq!("zh-2.0".parse::<PromptVersion>().unwrap(), PromptVersion::Zh2);
        assert_eq!("en".parse::<PromptVersion>().unwrap(), PromptVersion::En);
        assert!("FR".parse::<PromptVersion>().is_err());
    }

    #[test]
    fn json_schema_requires_every_field() {
        let schema = PromptVersion::En2.spec().json_schema();
        assert_eq!(schema["required"].as_array().unwrap().len(), 7);
        assert_eq!(schema["properties"]["title"]["type"], "string");
    }
}
