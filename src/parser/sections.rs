//! Section label table and block splitting
//!
//! A heading is a line whose text, once list numbering and markdown
//! decoration are stripped, is a known label optionally followed by `:`.
//! A block runs until the next known heading.

use crate::models::SectionKind;
use std::collections::BTreeMap;

/// Labels in the order the draft prompt requests them
pub const SECTION_TABLE: &[(&str, SectionKind)] = &[
    ("EXECUTIVE SUMMARY", SectionKind::ExecutiveSummary),
    ("PORTFOLIO RECOMMENDATIONS", SectionKind::Recommendations),
    ("RISK ASSESSMENT", SectionKind::RiskAssessment),
    ("TIME HORIZON ANALYSIS", SectionKind::TimeHorizon),
    ("MONTHLY SAVINGS NEEDED", SectionKind::MonthlySavings),
    ("GOAL ACHIEVEMENT TIMELINE", SectionKind::GoalTimeline),
    ("GOAL RISKS AND MITIGATION", SectionKind::GoalRisks),
    ("ADDITIONAL ADVICE", SectionKind::AdditionalAdvice),
    ("COMPLIANCE NOTES", SectionKind::ComplianceNotes),
];

/// Minimum non-whitespace characters for a block to count as present
pub const MIN_CONTENT_CHARS: usize = 10;

pub fn label_of(kind: SectionKind) -> &'static str {
    SECTION_TABLE
        .iter()
        .find(|(_, k)| *k == kind)
        .map(|(label, _)| *label)
        .unwrap_or("")
}

/// Match a heading line. Returns the section and any inline content after
/// the colon.
pub fn match_heading(line: &str) -> Option<(SectionKind, String)> {
    let stripped = line
        .trim()
        .trim_start_matches(|c: char| {
            c == '#' || c == '*' || c == '_' || c == '.' || c == ')' || c.is_ascii_digit() || c.is_whitespace()
        });

    let normalized = stripped.replace('&', "AND");
    let upper = normalized.to_uppercase();

    for (label, kind) in SECTION_TABLE {
        if !upper.starts_with(label) {
            continue;
        }

        let Some(rest) = normalized.get(label.len()..) else {
            continue;
        };
        let rest = rest.trim_start_matches(|c: char| c == '*' || c == '_' || c == '#');
        let rest = rest.trim_start();

        if rest.is_empty() {
            return Some((*kind, String::new()));
        }
        if let Some(inline) = rest.strip_prefix(':') {
            let inline = inline.trim().trim_matches(|c: char| c == '*' || c == '_').trim();
            return Some((*kind, inline.to_string()));
        }
    }

    None
}

/// Split raw text into labeled blocks. Text before the first heading is
/// dropped; a repeated heading keeps its first block.
pub fn split_sections(raw: &str) -> BTreeMap<SectionKind, String> {
    fn close(
        current: &mut Option<(SectionKind, Vec<String>)>,
        blocks: &mut BTreeMap<SectionKind, String>,
    ) {
        if let Some((kind, lines)) = current.take() {
            blocks.entry(kind).or_insert_with(|| lines.join("\n").trim().to_string());
        }
    }

    let mut blocks: BTreeMap<SectionKind, String> = BTreeMap::new();
    let mut current: Option<(SectionKind, Vec<String>)> = None;

    for line in raw.lines() {
        if let Some((kind, inline)) = match_heading(line) {
            close(&mut current, &mut blocks);
            let mut lines = Vec::new();
            if !inline.is_empty() {
                lines.push(inline);
            }
            current = Some((kind, lines));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line.to_string());
        }
    }
    close(&mut current, &mut blocks);

    blocks
}

/// The block's text if it carries enough content to use
pub fn meaningful(block: Option<&String>) -> Option<&str> {
    block
        .map(|b| b.trim())
        .filter(|b| b.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CONTENT_CHARS)
}

/// Remove list bullets and emphasis markers from a line
pub fn strip_bullet(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| c == '-' || c == '•' || c == '*' || c == '+' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '*' || c.is_whitespace())
}

pub fn is_bullet(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('-') || t.starts_with('•') || t.starts_with('*') || t.starts_with('+')
}

/// Item text of a bulleted or numbered list line
pub fn list_item(line: &str) -> Option<&str> {
    if is_bullet(line) {
        let item = strip_bullet(line);
        return (!item.is_empty()).then_some(item);
    }

    let t = line.trim();
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }

    let rest = &t[digits..];
    let item = rest
        .strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))?
        .trim();
    (!item.is_empty()).then_some(item)
}

/// Join non-empty lines into one paragraph
pub fn collapse(block: &str) -> String {
    block
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Value of a `Field: value` line when the field name matches one of `names`
pub fn field_value<'a>(line: &'a str, names: &[&str]) -> Option<&'a str> {
    let text = strip_bullet(line);
    let (key, value) = text.split_once(':')?;
    let key = key.trim().trim_matches('*').trim().to_lowercase();

    if names.iter().any(|n| key == *n) {
        let value = value.trim().trim_start_matches('*').trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    } else {
        None
    }
}
