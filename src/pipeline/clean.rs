//! Text cleanup: deterministic repairs applied to extracted text.
//!
//! PDF text layers carry typographic artefacts that are harmless on paper
//! but noisy in a prompt: ligature glyphs (`ﬁ`), zero-width characters,
//! CRLF line endings, ragged trailing whitespace and long runs of blank
//! lines. Each rule below is a pure `&str → String` function, independently
//! tested.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so that the per-line rules see `\n`
//! only; blank lines are collapsed after trailing whitespace is trimmed so
//! that whitespace-only lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Cleanup for one page of PDF text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF/CR → LF)
/// 2. Repair ligature glyphs (`ﬁ` → `fi`, ...)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines to a single blank line
/// 6. Trim leading/trailing blank space of the whole text
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = repair_ligatures(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Cleanup for plain-text and Markdown sources. Ligatures are left alone;
/// text files are assumed to hold what the author typed.
pub fn clean_plain_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Join cleaned pages with one blank line between them, skipping pages that
/// ended up empty.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Repair ligatures ─────────────────────────────────────────────────

const LIGATURES: [(char, &str); 7] = [
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

fn repair_ligatures(input: &str) -> String {
    if !input.chars().any(|c| ('\u{FB00}'..='\u{FB06}').contains(&c)) {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match LIGATURES.iter().find(|(lig, _)| *lig == c) {
            Some((_, rep)) => out.push_str(rep),
            None => out.push(c),
        }
    }
    out
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_ligatures() {
        assert_eq!(repair_ligatures("e\u{FB03}cient \u{FB01}eld \u{FB02}ow"), "efficient field flow");
        assert_eq!(repair_ligatures("plain"), "plain");
    }

    #[test]
    fn test_invisible_chars() {
        assert_eq!(remove_invisible_chars("\u{FEFF}hel\u{200B}lo"), "hello");
    }

    #[test]
    fn test_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace("a  \nb\t\n  c"), "a\nb\n  c");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn test_page_pipeline_order() {
        // Whitespace-only lines must collapse once trailing spaces are gone.
        let raw = "  Title\r\n   \r\n \r\n\r\nThe \u{FB01}rst result.  \r\n";
        assert_eq!(clean_page_text(raw), "Title\n\nThe first result.");
    }

    #[test]
    fn test_plain_text_keeps_ligatures() {
        assert_eq!(clean_plain_text("\u{FB01}\r\n"), "\u{FB01}");
    }

    #[test]
    fn test_join_pages_skips_empty() {
        let pages = vec!["one".to_string(), "  ".to_string(), "two\n".to_string()];
        assert_eq!(join_pages(&pages), "one\n\ntwo");
    }
}
