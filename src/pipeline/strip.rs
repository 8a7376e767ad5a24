//! Header/footer removal for paginated text.
//!
//! Running heads, page numbers and copyright footers repeat on most pages of
//! a paper. Left in, they scatter through the joined body and cost tokens.
//!
//! ## Algorithm
//!
//! 1. The *candidate zone* of a page is its first `zone_lines` and last
//!    `zone_lines` non-blank lines (the two ends may overlap on short pages).
//! 2. Candidates are normalised: trimmed, internal whitespace collapsed, and
//!    every run of digits replaced by `#`, so `Page 3 of 12` and
//!    `Page 4 of 12` compare equal.
//! 3. A normalised line is boilerplate when it occurs in the zone of at least
//!    `threshold × pages` pages (counted once per page).
//! 4. Zone lines whose normalised form is boilerplate are dropped. The same
//!    text in the middle of a page is kept.
//!
//! Removing a header exposes the next line to the zone, so steps 1-4 repeat
//! until a pass removes nothing. That makes [`HeaderFooterStripper::strip`]
//! idempotent: its output is already a fixpoint.
//!
//! The zone is re-evaluated on every pass. A repeating line that started
//! just below the zone (line 4 with `zone_lines = 3` under a one-line
//! header) moves into it once the header is gone and is then stripped
//! too. Repeated text deeper in the page than the lines removed above it
//! never enters the zone and is kept.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Tuning for [`HeaderFooterStripper`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StripConfig {
    /// Documents with fewer pages are returned untouched.
    pub min_pages: usize,
    /// Lines from each end of a page that may be classified as boilerplate.
    pub zone_lines: usize,
    /// Fraction of pages a line must appear on (inclusive).
    pub threshold: f64,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            min_pages: 3,
            zone_lines: 3,
            threshold: 0.5,
        }
    }
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Normalised comparison key for a candidate line.
pub fn normalize_line(line: &str) -> String {
    let collapsed = RE_WHITESPACE.replace_all(line.trim(), " ");
    RE_DIGITS.replace_all(&collapsed, "#").into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct HeaderFooterStripper {
    config: StripConfig,
}

impl HeaderFooterStripper {
    pub fn new(config: StripConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StripConfig {
        &self.config
    }

    /// Remove repeating header/footer lines. Returns one string per input page.
    pub fn strip(&self, pages: &[String]) -> Vec<String> {
        if pages.len() < self.config.min_pages {
            return pages.to_vec();
        }

        let mut current: Vec<String> = pages.to_vec();
        let mut passes = 0usize;
        loop {
            let (next, removed) = self.strip_pass(&current);
            if removed == 0 {
                break;
            }
            passes += 1;
            debug!(pass = passes, removed, "stripped boilerplate lines");
            current = next;
        }
        current
    }

    fn strip_pass(&self, pages: &[String]) -> (Vec<String>, usize) {
        let split: Vec<Vec<&str>> = pages.iter().map(|p| p.split('\n').collect()).collect();
        let zones: Vec<Vec<usize>> = split.iter().map(|lines| self.zone(lines)).collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for (lines, zone) in split.iter().zip(&zones) {
            let seen: HashSet<String> = zone.iter().map(|&i| normalize_line(lines[i])).collect();
            for key in seen {
                *counts.entry(key).or_default() += 1;
            }
        }

        let needed = self.config.threshold * pages.len() as f64;
        let boilerplate: HashSet<&str> = counts
            .iter()
            .filter(|(_, &n)| n as f64 >= needed)
            .map(|(k, _)| k.as_str())
            .collect();
        if boilerplate.is_empty() {
            return (pages.to_vec(), 0);
        }

        let mut removed = 0usize;
        let out = split
            .iter()
            .zip(&zones)
            .map(|(lines, zone)| {
                let drop: HashSet<usize> = zone
                    .iter()
                    .copied()
                    .filter(|&i| boilerplate.contains(normalize_line(lines[i]).as_str()))
                    .collect();
                removed += drop.len();
                lines
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !drop.contains(i))
                    .map(|(_, l)| *l)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect();
        (out, removed)
    }

    /// Indices of the candidate lines of one page, deduplicated.
    fn zone(&self, lines: &[&str]) -> Vec<usize> {
        let non_blank: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        let k = self.config.zone_lines;
        let head = non_blank.iter().take(k);
        let tail = non_blank.iter().skip(non_blank.len().saturating_sub(k));
        let mut zone: Vec<usize> = head.chain(tail).copied().collect();
        zone.sort_unstable();
        zone.dedup();
        zone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: [&str; 8] = [
        "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel",
    ];

    /// `count` body lines unique to page `n`.
    fn body(n: usize, count: usize) -> Vec<String> {
        (0..count)
            .map(|j| format!("{} {} observation", WORDS[n % 8], WORDS[j % 8]))
            .collect()
    }

    fn page(lines: &[String]) -> String {
        lines.join("\n")
    }

    fn five_page_paper() -> Vec<String> {
        (1..=5)
            .map(|n| {
                let mut lines = body(n, 6);
                if n == 4 {
                    lines.insert(3, "Conclusion".to_string());
                }
                lines.push(String::new());
                lines.push(format!("Page {n} of 5"));
                page(&lines)
            })
            .collect()
    }

    #[test]
    fn normalisation_masks_digits_and_whitespace() {
        assert_eq!(normalize_line("  Page 3   of 12 "), "Page # of #");
        assert_eq!(normalize_line("Page 4 of 12"), normalize_line("Page 3 of 12"));
    }

    #[test]
    fn short_documents_are_untouched() {
        let s = HeaderFooterStripper::default();
        let pages: Vec<String> = (0..2)
            .map(|n| {
                let mut lines = vec!["Header".to_string()];
                lines.extend(body(n, 2));
                lines.push("Footer".to_string());
                page(&lines)
            })
            .collect();
        assert_eq!(s.strip(&pages), pages);
        assert!(s.strip(&[]).is_empty());
    }

    #[test]
    fn page_footer_removed_conclusion_kept() {
        let s = HeaderFooterStripper::default();
        let input = five_page_paper();
        let out = s.strip(&input);
        assert_eq!(out.len(), 5);
        for (i, p) in out.iter().enumerate() {
            assert!(!p.contains("of 5"), "footer left on page {}: {p}", i + 1);
            for line in body(i + 1, 6) {
                assert!(p.contains(&line), "body line lost on page {}: {line}", i + 1);
            }
        }
        assert!(out[3].contains("Conclusion"));
    }

    #[test]
    fn majority_header_removed_everywhere_body_copy_kept() {
        let mut pages: Vec<String> = (0..4)
            .map(|n| {
                let mut lines = vec!["Journal of Things".to_string()];
                lines.extend(body(n, 5));
                page(&lines)
            })
            .collect();
        // Header absent from the last page's zone but present in its body.
        let mut last = body(4, 8);
        last.insert(4, "Journal of Things".to_string());
        pages.push(page(&last));

        let out = HeaderFooterStripper::default().strip(&pages);
        for p in &out[..4] {
            assert!(!p.contains("Journal of Things"));
        }
        assert!(out[4].contains("Journal of Things"));
        assert_eq!(out[4], pages[4]);
    }

    #[test]
    fn threshold_is_inclusive() {
        // 2 of 4 pages = exactly 0.5.
        let pages: Vec<String> = (0..4)
            .map(|n| {
                let mut lines = body(n, 3);
                if n < 2 {
                    lines.insert(0, "Running head".to_string());
                }
                page(&lines)
            })
            .collect();
        let out = HeaderFooterStripper::default().strip(&pages);
        assert!(!out[0].contains("Running head"));
        assert!(!out[1].contains("Running head"));
        assert_eq!(out[2], pages[2]);
    }

    #[test]
    fn below_threshold_is_kept() {
        let s = HeaderFooterStripper::new(StripConfig {
            threshold: 0.6,
            ..StripConfig::default()
        });
        let pages: Vec<String> = (0..5)
            .map(|n| {
                let mut lines = body(n, 4);
                if n < 2 {
                    lines.insert(0, "Draft".to_string());
                }
                page(&lines)
            })
            .collect();
        assert_eq!(s.strip(&pages), pages);
    }

    #[test]
    fn stripping_is_idempotent() {
        let s = HeaderFooterStripper::default();
        let pages: Vec<String> = (1..=6)
            .map(|n| {
                let mut lines = vec![
                    "ACM Conference 2024".to_string(),
                    "Preprint. Under review.".to_string(),
                ];
                lines.extend(body(n, 5));
                lines.push(n.to_string());
                page(&lines)
            })
            .collect();
        let once = s.strip(&pages);
        let twice = s.strip(&once);
        assert_eq!(once, twice);
        assert!(once.iter().all(|p| !p.contains("ACM") && !p.contains("Preprint")));
        assert!(once[0].contains("bravo alpha observation"));
    }

    #[test]
    fn blank_pages_have_no_candidates() {
        let pages = vec![String::new(), "   ".to_string(), String::new()];
        assert_eq!(HeaderFooterStripper::default().strip(&pages), pages);
    }

    #[test]
    fn custom_min_pages_is_honoured() {
        let s = HeaderFooterStripper::new(StripConfig {
            min_pages: 10,
            ..StripConfig::default()
        });
        let pages = five_page_paper();
        assert_eq!(s.strip(&pages), pages);
    }

    #[test]
    fn repeats_exposed_by_header_removal_are_stripped() {
        let pages: Vec<String> = (1..=4)
            .map(|n| {
                let b = body(n, 8);
                let mut lines = vec!["Journal of Examples".to_string()];
                lines.extend_from_slice(&b[..2]);
                lines.push("See Section 2 for details".to_string());
                lines.push(b[2].clone());
                lines.push("Shared remark deeper in the page".to_string());
                lines.extend_from_slice(&b[3..]);
                page(&lines)
            })
            .collect();

        let out = HeaderFooterStripper::default().strip(&pages);
        for p in &out {
            assert!(!p.contains("Journal of Examples"));
            assert!(!p.contains("See Section 2"));
            assert!(p.contains("Shared remark deeper in the page"));
        }
        assert_eq!(HeaderFooterStripper::default().strip(&out), out);
    }
}
