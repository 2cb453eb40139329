//! Line-oriented Markdown helpers shared by the document projections.
//!
//! Parsing is total: nothing here returns an error. Callers turn lines they cannot
//! place into [`ProjectionWarning`]s instead.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static ID_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*id:\s*(.*?)\s*-->").expect("static regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)(?:\s+#+)?\s*$").expect("static regex"));
static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+(.*\S)\s*$").expect("static regex"));
static FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s+([^:]+?)\s*:\s*(.*?)\s*$").expect("static regex"));
/// A line that would open a new `## ` section, behind any number of `\` escapes.
static SECTION_LIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\\*##\s").expect("static regex"));
static ESCAPED_SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\\+##\s").expect("static regex"));
static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

/// A line `from_document` could not use, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionWarning {
    pub line: usize,
    pub message: String,
}

impl ProjectionWarning {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProjectionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Result of parsing a document: always an entity, plus whatever was dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection<T> {
    pub entity: T,
    pub warnings: Vec<ProjectionWarning>,
}

impl<T> Projection<T> {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Collapse runs of whitespace (including newlines) to one space and trim.
pub fn inline(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim trailing whitespace on every line and blank lines around the block.
pub fn block(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn is_escaped_fence(line: &str) -> bool {
    let rest = line.trim_start_matches('\\');
    rest.len() < line.len() && is_fence(rest)
}

/// Make free text safe to embed in a document body.
///
/// A line that would open a `## ` section gets a leading `\`, and so does the last
/// fence of an unbalanced code fence, which would otherwise hide every heading after
/// it. Lines already carrying such an escape get one more, so
/// [`unescape_free_text`] restores the input exactly.
pub fn escape_free_text(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let fences: Vec<usize> = (0..lines.len()).filter(|&i| is_fence(lines[i])).collect();
    let unmatched = if fences.len() % 2 == 1 { fences.last().copied() } else { None };
    let escaped: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            if SECTION_LIKE.is_match(line) || is_escaped_fence(line) || unmatched == Some(idx) {
                format!("\\{}", line)
            } else {
                line.to_string()
            }
        })
        .collect();
    escaped.join("\n")
}

pub fn unescape_free_text(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(|line| {
            if ESCAPED_SECTION.is_match(line) || is_escaped_fence(line) {
                &line[1..]
            } else {
                line
            }
        })
        .collect();
    lines.join("\n")
}

/// `title <!-- id: x -->`, or just `title` when `id` is empty.
pub fn with_id(title: &str, id: &str) -> String {
    if id.is_empty() {
        title.to_string()
    } else {
        format!("{} <!-- id: {} -->", title, id)
    }
}

/// Split a trailing id comment off `text`.
pub fn split_id(text: &str) -> (String, Option<String>) {
    match ID_COMMENT.captures(text) {
        Some(caps) => {
            let id = caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty());
            let title = ID_COMMENT.replace(text, "");
            (inline(&title), id)
        }
        None => (inline(text), None),
    }
}

/// Remove every id comment, keeping the rest of each line.
pub fn strip_id_comments(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| ID_COMMENT.replace_all(line, "").trim_end().to_string())
        .collect();
    lines.join("\n")
}

pub fn numbered_item(line: &str) -> Option<&str> {
    NUMBERED.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// `- Key: value` as `(lowercased key, value)`.
pub fn field(line: &str) -> Option<(String, String)> {
    let caps = FIELD.captures(line)?;
    let key = caps.get(1)?.as_str().trim().to_ascii_lowercase();
    let value = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some((key, value))
}

pub fn first_number(text: &str) -> Option<u32> {
    FIRST_NUMBER.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Comma-separated list, trimmed, empties dropped.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',').map(inline).filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line<'a> {
    /// 1-based.
    pub number: usize,
    pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub title: String,
    pub id: Option<String>,
    pub line: usize,
    pub body: Vec<Line<'a>>,
}

impl Section<'_> {
    /// Body text with surrounding blank lines removed and escapes undone.
    pub fn content(&self) -> String {
        let lines: Vec<&str> = self.body.iter().map(|l| l.text).collect();
        block(&unescape_free_text(&lines.join("\n")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outline<'a> {
    /// Text of the leading `# ` heading, if any.
    pub title: Option<String>,
    /// Lines between the title and the first `## ` heading.
    pub preamble: Vec<Line<'a>>,
    pub sections: Vec<Section<'a>>,
}

impl Outline<'_> {
    pub fn preamble_text(&self) -> String {
        let lines: Vec<&str> = self.preamble.iter().map(|l| l.text).collect();
        block(&unescape_free_text(&lines.join("\n")))
    }
}

/// Split a document on `## ` headings, ignoring headings inside fenced code blocks.
pub fn outline(doc: &str) -> Outline<'_> {
    let mut out = Outline::default();
    let mut in_fence = false;
    let mut seen_content = false;

    for (idx, text) in doc.lines().enumerate() {
        let line = Line { number: idx + 1, text };
        let trimmed = text.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { HEADING.captures(text) };

        if let Some(caps) = heading {
            let level = caps.get(1).map_or(0, |m| m.as_str().len());
            let raw = caps.get(2).map_or("", |m| m.as_str());
            if level == 1 && !seen_content && out.title.is_none() {
                out.title = Some(inline(raw));
                continue;
            }
            if level == 2 {
                let (title, id) = split_id(raw);
                out.sections.push(Section {
                    title,
                    id,
                    line: line.number,
                    body: Vec::new(),
                });
                seen_content = true;
                continue;
            }
        }

        if !text.trim().is_empty() {
            seen_content = true;
        }
        match out.sections.last_mut() {
            Some(section) => section.body.push(line),
            None => out.preamble.push(line),
        }
    }
    out
}

/// One numbered entry inside a section: its title line and the lines under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedEntry<'a> {
    pub title: String,
    pub id: Option<String>,
    pub line: usize,
    pub details: Vec<Line<'a>>,
}

/// Group a section body into numbered entries. Non-blank lines before the first
/// entry are returned separately.
pub fn numbered_entries<'a>(body: &[Line<'a>]) -> (Vec<Line<'a>>, Vec<NumberedEntry<'a>>) {
    let mut loose = Vec::new();
    let mut entries: Vec<NumberedEntry<'a>> = Vec::new();
    for line in body {
        if let Some(raw) = numbered_item(line.text) {
            let (title, id) = split_id(raw);
            entries.push(NumberedEntry {
                title,
                id,
                line: line.number,
                details: Vec::new(),
            });
            continue;
        }
        if line.text.trim().is_empty() {
            continue;
        }
        match entries.last_mut() {
            Some(entry) => entry.details.push(line.clone()),
            None => loose.push(line.clone()),
        }
    }
    (loose, entries)
}
