//! Requirements entity and its Markdown projection (`docs/requirements.md`).
//!
//! Document shape:
//!
//! ```text
//! # Requirements
//!
//! <free text>
//!
//! ## Functional Requirements
//!
//! 1. Title <!-- id: req-1 -->
//!    - Description: ...
//!    - Priority: high
//!
//! ## Non-functional Requirements
//!
//! Pending...
//!
//! ## <any other section> <!-- id: section-1 -->
//! ```
//!
//! Free text is written through [`markdown::escape_free_text`] so it cannot open a section.

use crate::plugins::markdown::{self, Projection, ProjectionWarning};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DOCUMENT_TITLE: &str = "Requirements";
pub const FUNCTIONAL_HEADING: &str = "Functional Requirements";
pub const NON_FUNCTIONAL_HEADING: &str = "Non-functional Requirements";
pub const EMPTY_PLACEHOLDER: &str = "Pending...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementCategory {
    #[default]
    Functional,
    NonFunctional,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequirementSection {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequirementItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: RequirementCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: String,
    pub language: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_blocks: Vec<CodeBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    #[serde(default)]
    pub document: String,
    #[serde(default)]
    pub sections: Vec<RequirementSection>,
    #[serde(default)]
    pub extracted_items: Vec<RequirementItem>,
    /// Not part of the document projection.
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Items(RequirementCategory),
    Other,
}

fn classify(title: &str) -> SectionKind {
    let lower = title.to_lowercase();
    if lower.contains("non-functional")
        || lower.contains("nonfunctional")
        || lower.contains("non functional")
        || title.contains("非機能要件")
    {
        SectionKind::Items(RequirementCategory::NonFunctional)
    } else if lower.contains("functional requirements")
        || lower.trim() == "functional"
        || title.contains("機能要件")
    {
        SectionKind::Items(RequirementCategory::Functional)
    } else {
        SectionKind::Other
    }
}

fn is_placeholder(text: &str) -> bool {
    let t = text.trim();
    t == EMPTY_PLACEHOLDER || t == "準備中..." || (t.starts_with('(') && t.ends_with(')'))
}

impl Requirements {
    pub fn items(&self, category: RequirementCategory) -> impl Iterator<Item = &RequirementItem> {
        self.extracted_items.iter().filter(move |i| i.category == category)
    }

    /// Document order: functional items, then non-functional, text trimmed,
    /// reserved section titles dropped, missing ids filled in.
    pub fn canonical(&self) -> Self {
        let mut extracted_items = Vec::with_capacity(self.extracted_items.len());
        for category in [RequirementCategory::Functional, RequirementCategory::NonFunctional] {
            for item in self.items(category) {
                let n = extracted_items.len() + 1;
                extracted_items.push(RequirementItem {
                    id: if item.id.trim().is_empty() {
                        format!("req-{}", n)
                    } else {
                        item.id.trim().to_string()
                    },
                    title: markdown::inline(&item.title),
                    description: markdown::inline(&item.description),
                    priority: item.priority,
                    category,
                });
            }
        }

        let sections = self
            .sections
            .iter()
            .filter(|s| classify(&markdown::inline(&s.title)) == SectionKind::Other)
            .enumerate()
            .map(|(idx, s)| RequirementSection {
                id: if s.id.trim().is_empty() {
                    format!("section-{}", idx + 1)
                } else {
                    s.id.trim().to_string()
                },
                title: markdown::inline(&s.title),
                content: markdown::block(&s.content),
            })
            .collect();

        Self {
            document: markdown::block(&self.document),
            sections,
            extracted_items,
            chat_history: self.chat_history.clone(),
        }
    }

    pub fn to_document(&self) -> String {
        let canonical = self.canonical();
        let mut md = format!("# {}\n\n", DOCUMENT_TITLE);
        if !canonical.document.is_empty() {
            md.push_str(&markdown::escape_free_text(&canonical.document));
            md.push_str("\n\n");
        }

        for (category, heading) in [
            (RequirementCategory::Functional, FUNCTIONAL_HEADING),
            (RequirementCategory::NonFunctional, NON_FUNCTIONAL_HEADING),
        ] {
            md.push_str(&format!("## {}\n\n", heading));
            let items: Vec<&RequirementItem> = canonical.items(category).collect();
            if items.is_empty() {
                md.push_str(EMPTY_PLACEHOLDER);
                md.push_str("\n\n");
            }
            for (idx, item) in items.iter().enumerate() {
                md.push_str(&format!("{}. {}\n", idx + 1, markdown::with_id(&item.title, &item.id)));
                md.push_str(&format!("   - Description: {}\n", item.description));
                md.push_str(&format!("   - Priority: {}\n\n", item.priority));
            }
        }

        for section in &canonical.sections {
            md.push_str(&format!("## {}\n\n", markdown::with_id(&section.title, &section.id)));
            if !section.content.is_empty() {
                md.push_str(&markdown::escape_free_text(&section.content));
                md.push_str("\n\n");
            }
        }

        let trimmed = md.trim_end().len();
        md.truncate(trimmed);
        md.push('\n');
        md
    }

    /// Parse a (possibly hand-edited) requirements document. Never fails; lines that
    /// cannot be placed are reported as warnings. `chat_history` is always empty.
    pub fn from_document(doc: &str) -> Projection<Self> {
        let outline = markdown::outline(doc);
        let mut warnings = Vec::new();
        let mut req = Requirements {
            document: outline.preamble_text(),
            ..Default::default()
        };

        for section in &outline.sections {
            let category = match classify(&section.title) {
                SectionKind::Items(category) => category,
                SectionKind::Other => {
                    let id = section
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("section-{}", req.sections.len() + 1));
                    req.sections.push(RequirementSection {
                        id,
                        title: section.title.clone(),
                        content: section.content(),
                    });
                    continue;
                }
            };

            let (loose, entries) = markdown::numbered_entries(&section.body);
            for line in loose.iter().filter(|l| !is_placeholder(l.text)) {
                warnings.push(ProjectionWarning::new(
                    line.number,
                    format!("ignored text outside a numbered requirement: {}", line.text.trim()),
                ));
            }

            for entry in entries {
                let n = req.extracted_items.len() + 1;
                let mut item = RequirementItem {
                    id: entry.id.unwrap_or_else(|| format!("req-{}", n)),
                    title: entry.title,
                    description: String::new(),
                    priority: Priority::Medium,
                    category,
                };
                for detail in &entry.details {
                    match markdown::field(detail.text) {
                        Some((key, value)) if key == "description" || key == "説明" => {
                            item.description = markdown::inline(&value);
                        }
                        Some((key, value)) if key == "priority" || key == "優先度" => {
                            match Priority::parse(&value) {
                                Some(priority) => item.priority = priority,
                                None => warnings.push(ProjectionWarning::new(
                                    detail.number,
                                    format!("invalid priority '{}', using medium", value.trim()),
                                )),
                            }
                        }
                        _ => warnings.push(ProjectionWarning::new(
                            detail.number,
                            format!("ignored line in requirement '{}': {}", item.title, detail.text.trim()),
                        )),
                    }
                }
                req.extracted_items.push(item);
            }
        }

        if !warnings.is_empty() {
            tracing::debug!(count = warnings.len(), "requirements document parsed with warnings");
        }
        Projection {
            entity: req,
            warnings,
        }
    }
}
