//! Title and heading outline detection.
//!
//! Bookmarks embedded in the PDF win when present. Otherwise each text line
//! is scored on cheap layout-free signals (numbering, capitalization,
//! length, punctuation) and lines well above the document's mean score are
//! kept as headings.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{HeadingLevel, OutlineEntry, PageRecord};

/// Lowest score a line needs to be considered a heading at all.
const MIN_HEADING_SCORE: f64 = 1.5;

/// How many leading lines a metadata title has to appear in to be trusted.
const TITLE_SEARCH_LINES: usize = 20;

/// A bookmark read from the document's `/Outlines` tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    /// 1-based nesting depth
    pub depth: usize,
    pub title: String,
    pub page: u32,
}

#[derive(Debug, Clone)]
struct Line<'a> {
    page: u32,
    text: &'a str,
}

fn numbering_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<num>[0-9]+(?:\.[0-9]+)*\.?|[IVXLCDM]+\.)\s+\S")
            .expect("numbering pattern is valid")
    })
}

/// Numbering depth of a heading-like prefix (`2.` → 1, `2.3` → 2).
fn numbering_depth(text: &str) -> Option<usize> {
    let caps = numbering_pattern().captures(text)?;
    let num = caps.name("num")?.as_str().trim_end_matches('.');
    if num.chars().all(|c| c.is_ascii_digit() || c == '.') {
        Some(num.split('.').count())
    } else {
        Some(1)
    }
}

fn is_all_caps(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && text.len() > 2 && letters.all(|c| c.is_uppercase())
}

fn score_line(text: &str) -> f64 {
    let mut score = 0.0;
    let tokens = text.split_whitespace().count();

    if numbering_depth(text).is_some() {
        score += 1.5;
    }
    if is_all_caps(text) {
        score += 0.5;
    }
    if (2..=12).contains(&tokens) {
        score += 1.0;
    } else if tokens > 20 {
        score -= 1.0;
    }
    if text.ends_with(':') {
        score += 0.25;
    }
    if text.ends_with(['.', ',', ';', '!', '?']) {
        score -= 1.0;
    }
    score
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lines(pages: &[PageRecord]) -> Vec<Line<'_>> {
    pages
        .iter()
        .flat_map(|page| {
            page.text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(move |text| Line {
                    page: page.number,
                    text,
                })
        })
        .collect()
}

/// Build the heading outline for a document.
pub fn build_outline(bookmarks: &[Bookmark], pages: &[PageRecord]) -> Vec<OutlineEntry> {
    let entries = if bookmarks.is_empty() {
        detect_headings(pages)
    } else {
        bookmarks
            .iter()
            .map(|b| OutlineEntry {
                level: HeadingLevel::from_depth(b.depth),
                text: collapse_whitespace(&b.title),
                page: b.page,
            })
            .filter(|e| !e.text.is_empty())
            .collect()
    };
    normalize_levels(dedup(entries))
}

fn detect_headings(pages: &[PageRecord]) -> Vec<OutlineEntry> {
    let lines = lines(pages);
    if lines.is_empty() {
        return Vec::new();
    }

    let scores: Vec<f64> = lines.iter().map(|l| score_line(l.text)).collect();
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let stdev = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
    let threshold = (mean + stdev / 2.0).max(MIN_HEADING_SCORE);

    lines
        .iter()
        .zip(&scores)
        .filter(|(_, &score)| score >= threshold)
        .map(|(line, _)| {
            let level = numbering_depth(line.text)
                .map(HeadingLevel::from_depth)
                .unwrap_or(HeadingLevel::H2);
            OutlineEntry {
                level,
                text: collapse_whitespace(line.text),
                page: line.page,
            }
        })
        .collect()
}

fn dedup(entries: Vec<OutlineEntry>) -> Vec<OutlineEntry> {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert((e.text.clone(), e.page)))
        .collect()
}

/// At least one H1, and no H3 before the first H2.
fn normalize_levels(mut entries: Vec<OutlineEntry>) -> Vec<OutlineEntry> {
    if !entries.iter().any(|e| e.level == HeadingLevel::H1) {
        if let Some(first) = entries.first_mut() {
            first.level = HeadingLevel::H1;
        }
    }

    let mut seen_h2 = false;
    for entry in &mut entries {
        match entry.level {
            HeadingLevel::H2 => seen_h2 = true,
            HeadingLevel::H3 if !seen_h2 => {
                entry.level = HeadingLevel::H2;
                seen_h2 = true;
            }
            _ => {}
        }
    }
    entries
}

/// Pick a document title.
///
/// A metadata title is only trusted when it also shows up near the start of
/// the text; otherwise the first outline entry on page 1 is used.
pub fn detect_title(
    metadata_title: Option<&str>,
    pages: &[PageRecord],
    outline: &[OutlineEntry],
) -> Option<String> {
    if let Some(meta) = metadata_title.map(collapse_whitespace) {
        if !meta.is_empty() {
            let needle = meta.to_lowercase();
            let found = lines(pages)
                .iter()
                .take(TITLE_SEARCH_LINES)
                .any(|l| collapse_whitespace(l.text).to_lowercase().contains(&needle));
            if found {
                return Some(meta);
            }
        }
    }

    outline
        .iter()
        .find(|e| e.page == 1)
        .map(|e| e.text.clone())
}
