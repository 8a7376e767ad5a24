//! Prompt rendering: document body + [`PromptSpec`] → prompt text.
//!
//! Pure and synchronous. The only policy here is body truncation, which is
//! character based (not byte based, so CJK text is not split mid-codepoint)
//! and never cuts through a word unless the window holds no whitespace at
//! all.

use crate::document::Document;
use crate::prompts::{PromptSpec, BODY_PLACEHOLDER, FIELDS_PLACEHOLDER, TRUNCATION_NOTE};
use tracing::debug;

/// Default body limit in characters.
pub const DEFAULT_MAX_BODY_CHARS: usize = 128_000;

/// A prompt ready to send to an engine.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub text: String,
    pub spec: &'static PromptSpec,
    /// Whether the body was cut to fit the limit.
    pub truncated: bool,
}

/// Cut `body` to at most `max_chars` characters at a word boundary.
///
/// Returns the kept prefix and whether anything was cut. The prefix ends
/// either at the original last character or right before whitespace in the
/// original. When the first `max_chars` characters contain no whitespace
/// the cut is made exactly at the limit.
pub fn truncate_at_word_boundary(body: &str, max_chars: usize) -> (&str, bool) {
    let Some((limit, next)) = body.char_indices().nth(max_chars) else {
        return (body, false);
    };
    if next.is_whitespace() {
        return (body[..limit].trim_end(), true);
    }
    let window = &body[..limit];
    match window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        Some((ws, _)) => (window[..ws].trim_end(), true),
        None => (window, true),
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_body_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_CHARS)
    }
}

impl PromptBuilder {
    pub fn new(max_body_chars: usize) -> Self {
        Self { max_body_chars }
    }

    pub fn max_body_chars(&self) -> usize {
        self.max_body_chars
    }

    pub fn render(&self, document: &Document, spec: &'static PromptSpec) -> RenderedPrompt {
        self.render_body(document.body(), spec)
    }

    pub fn render_body(&self, body: &str, spec: &'static PromptSpec) -> RenderedPrompt {
        let (kept, truncated) = truncate_at_word_boundary(body, self.max_body_chars);
        let body_text = if truncated {
            debug!(
                limit = self.max_body_chars,
                kept = kept.chars().count(),
                "body truncated"
            );
            format!("{kept}\n\n{TRUNCATION_NOTE}")
        } else {
            kept.to_string()
        };

        let text = spec
            .template
            .replace(FIELDS_PLACEHOLDER, &field_list(spec))
            .replace(BODY_PLACEHOLDER, &body_text);

        RenderedPrompt {
            text,
            spec,
            truncated,
        }
    }
}

fn field_list(spec: &PromptSpec) -> String {
    spec.fields
        .iter()
        .map(|f| format!("- {}: {}", f.name, f.description))
        .collect::<Vec<_>>()
        .join("\n")
}
