//! Implementation scope entity and its Markdown projection (`docs/scope.md`).
//!
//! Items are grouped by status under fixed headings (`Completed`, `In Progress`,
//! `Not Started`), followed by a `Progress Info` block. `Overall Progress` in that
//! block is authoritative; without it, progress is derived from completed items.

use crate::core::time;
use crate::plugins::markdown::{self, Projection, ProjectionWarning};
use crate::plugins::requirements::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DOCUMENT_TITLE: &str = "Implementation Scope";
pub const PROGRESS_HEADING: &str = "Progress Info";
const NOT_SET: &str = "Not set";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl ScopeStatus {
    /// Document order.
    pub const ORDER: [ScopeStatus; 3] = [
        ScopeStatus::Completed,
        ScopeStatus::InProgress,
        ScopeStatus::Pending,
    ];

    pub fn heading(&self) -> &'static str {
        match self {
            ScopeStatus::Completed => "Completed",
            ScopeStatus::InProgress => "In Progress",
            ScopeStatus::Pending => "Not Started",
        }
    }

    fn placeholder(&self) -> &'static str {
        match self {
            ScopeStatus::Completed => "(No completed items yet)",
            ScopeStatus::InProgress => "(Items being implemented appear here)",
            ScopeStatus::Pending => "(Items not yet started appear here)",
        }
    }

    /// Progress implied by the status alone.
    pub fn default_progress(&self) -> u32 {
        match self {
            ScopeStatus::Completed => 100,
            ScopeStatus::InProgress => 50,
            ScopeStatus::Pending => 0,
        }
    }

    fn from_heading(title: &str) -> Option<Self> {
        let lower = title.trim().to_lowercase();
        match lower.as_str() {
            "completed" | "done" | "完了" => Some(ScopeStatus::Completed),
            "in progress" | "in-progress" | "進行中" => Some(ScopeStatus::InProgress),
            "not started" | "pending" | "未着手" => Some(ScopeStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for ScopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeStatus::Pending => "pending",
            ScopeStatus::InProgress => "in-progress",
            ScopeStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    High,
    #[default]
    Medium,
    Low,
}

impl Complexity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Complexity::High),
            "medium" => Some(Complexity::Medium),
            "low" => Some(Complexity::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::High => "high",
            Complexity::Medium => "medium",
            Complexity::Low => "low",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub status: ScopeStatus,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationScope {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub items: Vec<ImplementationItem>,
    #[serde(default)]
    pub selected_ids: Vec<String>,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub total_progress: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
}

fn date_field(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(markdown::inline)
        .filter(|v| !v.is_empty() && v != NOT_SET && v != "未設定")
}

impl ImplementationScope {
    /// A fresh scope id, used when a scope is saved without one.
    pub fn new_id() -> String {
        time::prefixed_id("scope")
    }

    pub fn is_selected(&self, item_id: &str) -> bool {
        self.selected_ids.iter().any(|id| id == item_id)
    }

    pub fn items_with_status(&self, status: ScopeStatus) -> impl Iterator<Item = &ImplementationItem> {
        self.items.iter().filter(move |i| i.status == status)
    }

    /// round(completed / total * 100), 0 for an empty scope.
    pub fn derived_progress(&self) -> u32 {
        if self.items.is_empty() {
            return 0;
        }
        let completed = self.items_with_status(ScopeStatus::Completed).count() as f64;
        ((completed / self.items.len() as f64) * 100.0).round() as u32
    }

    /// Document order: completed, in progress, not started; text trimmed, missing
    /// item ids filled in, `selected_ids` reduced to known items in item order.
    pub fn canonical(&self) -> Self {
        let mut items = Vec::with_capacity(self.items.len());
        for status in ScopeStatus::ORDER {
            for item in self.items_with_status(status) {
                let n = items.len() + 1;
                items.push(ImplementationItem {
                    id: if item.id.trim().is_empty() {
                        format!("item-{}", n)
                    } else {
                        item.id.trim().to_string()
                    },
                    title: markdown::inline(&item.title),
                    description: markdown::inline(&item.description),
                    priority: item.priority,
                    complexity: item.complexity,
                    status,
                    progress: item.progress,
                    dependencies: item.dependencies.iter().flat_map(|d| markdown::split_list(d)).collect(),
                    related_files: item.related_files.iter().flat_map(|f| markdown::split_list(f)).collect(),
                });
            }
        }

        let mut selected_ids: Vec<String> = Vec::new();
        for (original, item) in ordered_originals(&self.items).zip(items.iter()) {
            let selected = self.is_selected(&original.id) || self.is_selected(original.id.trim());
            if selected && !selected_ids.contains(&item.id) {
                selected_ids.push(item.id.clone());
            }
        }

        Self {
            id: markdown::inline(&self.id),
            items,
            selected_ids,
            estimated_time: markdown::inline(&self.estimated_time),
            total_progress: self.total_progress,
            start_date: date_field(&self.start_date),
            target_date: date_field(&self.target_date),
        }
    }

    pub fn to_document(&self) -> String {
        let scope = self.canonical();
        let mut md = format!("# {}\n\n", DOCUMENT_TITLE);

        for status in ScopeStatus::ORDER {
            md.push_str(&format!("## {}\n\n", status.heading()));
            let items: Vec<&ImplementationItem> = scope.items_with_status(status).collect();
            if items.is_empty() {
                md.push_str(status.placeholder());
                md.push_str("\n\n");
            }
            for (idx, item) in items.iter().enumerate() {
                md.push_str(&format!("{}. {}\n", idx + 1, markdown::with_id(&item.title, &item.id)));
                md.push_str(&format!("   - Description: {}\n", item.description));
                md.push_str(&format!("   - Priority: {}\n", item.priority));
                md.push_str(&format!("   - Complexity: {}\n", item.complexity));
                if item.progress != status.default_progress() {
                    md.push_str(&format!("   - Progress: {}%\n", item.progress));
                }
                if !scope.is_selected(&item.id) {
                    md.push_str("   - Selected: no\n");
                }
                if !item.related_files.is_empty() {
                    md.push_str(&format!("   - Related Files: {}\n", item.related_files.join(", ")));
                }
                if !item.dependencies.is_empty() {
                    md.push_str(&format!("   - Dependencies: {}\n", item.dependencies.join(", ")));
                }
                md.push('\n');
            }
        }

        let count = |s: ScopeStatus| scope.items_with_status(s).count();
        md.push_str(&format!("## {}\n\n", PROGRESS_HEADING));
        if !scope.id.is_empty() {
            md.push_str(&format!("- Scope ID: {}\n", scope.id));
        }
        md.push_str(&format!("- Overall Progress: {}%\n", scope.total_progress));
        md.push_str(&format!("- Start Date: {}\n", scope.start_date.as_deref().unwrap_or(NOT_SET)));
        md.push_str(&format!("- Target Date: {}\n", scope.target_date.as_deref().unwrap_or(NOT_SET)));
        if !scope.estimated_time.is_empty() {
            md.push_str(&format!("- Estimated Time: {}\n", scope.estimated_time));
        }
        md.push_str(&format!("- Total Items: {}\n", scope.items.len()));
        md.push_str(&format!("- Completed Items: {}\n", count(ScopeStatus::Completed)));
        md.push_str(&format!("- In Progress Items: {}\n", count(ScopeStatus::InProgress)));
        md.push_str(&format!("- Not Started Items: {}\n", count(ScopeStatus::Pending)));
        md
    }

    /// Parse a (possibly hand-edited) scope document. Never fails.
    pub fn from_document(doc: &str) -> Projection<Self> {
        let outline = markdown::outline(doc);
        let mut warnings = Vec::new();
        let mut scope = ImplementationScope::default();
        let mut unselected: Vec<String> = Vec::new();
        let mut overall: Option<u32> = None;

        for section in &outline.sections {
            if let Some(status) = ScopeStatus::from_heading(&section.title) {
                parse_items(section, status, &mut scope, &mut unselected, &mut warnings);
                continue;
            }
            let lower = section.title.to_lowercase();
            if lower == PROGRESS_HEADING.to_lowercase() || section.title == "進捗情報" {
                overall = parse_progress_info(section, &mut scope, &mut warnings);
                continue;
            }
            warnings.push(ProjectionWarning::new(
                section.line,
                format!("unrecognized section '{}' ignored", section.title),
            ));
        }

        scope.selected_ids = scope
            .items
            .iter()
            .filter(|i| !unselected.contains(&i.id))
            .map(|i| i.id.clone())
            .collect();
        scope.total_progress = overall.unwrap_or_else(|| scope.derived_progress());

        Projection {
            entity: scope,
            warnings,
        }
    }
}

fn ordered_originals(items: &[ImplementationItem]) -> impl Iterator<Item = &ImplementationItem> {
    ScopeStatus::ORDER
        .into_iter()
        .flat_map(move |status| items.iter().filter(move |i| i.status == status))
}

fn parse_items(
    section: &markdown::Section<'_>,
    status: ScopeStatus,
    scope: &mut ImplementationScope,
    unselected: &mut Vec<String>,
    warnings: &mut Vec<ProjectionWarning>,
) {
    let (loose, entries) = markdown::numbered_entries(&section.body);
    for line in loose {
        let t = line.text.trim();
        if !(t.starts_with('(') && t.ends_with(')')) && !(t.starts_with('（') && t.ends_with('）')) {
            warnings.push(ProjectionWarning::new(
                line.number,
                format!("ignored text outside a numbered item: {}", t),
            ));
        }
    }

    for entry in entries {
        let n = scope.items.len() + 1;
        let mut item = ImplementationItem {
            id: entry.id.unwrap_or_else(|| format!("item-{}", n)),
            title: entry.title,
            status,
            progress: status.default_progress(),
            ..Default::default()
        };
        for detail in &entry.details {
            let Some((key, value)) = markdown::field(detail.text) else {
                warnings.push(ProjectionWarning::new(
                    detail.number,
                    format!("ignored line in item '{}': {}", item.title, detail.text.trim()),
                ));
                continue;
            };
            let invalid = |what: &str| {
                ProjectionWarning::new(detail.number, format!("invalid {} '{}' in item '{}'", what, value.trim(), item.title))
            };
            match key.as_str() {
                "description" | "説明" => item.description = markdown::inline(&value),
                "priority" | "優先度" => match Priority::parse(&value) {
                    Some(p) => item.priority = p,
                    None => warnings.push(invalid("priority")),
                },
                "complexity" | "複雑度" => match Complexity::parse(&value) {
                    Some(c) => item.complexity = c,
                    None => warnings.push(invalid("complexity")),
                },
                "progress" | "進捗" => match markdown::first_number(&value) {
                    Some(p) => item.progress = p,
                    None => warnings.push(invalid("progress")),
                },
                "selected" => match value.trim().to_ascii_lowercase().as_str() {
                    "no" | "false" => unselected.push(item.id.clone()),
                    "yes" | "true" => {}
                    _ => warnings.push(invalid("selected flag")),
                },
                "related files" | "関連ファイル" => item.related_files = markdown::split_list(&value),
                "dependencies" | "依存関係" => item.dependencies = markdown::split_list(&value),
                _ => warnings.push(ProjectionWarning::new(
                    detail.number,
                    format!("unknown field '{}' in item '{}'", key, item.title),
                )),
            }
        }
        scope.items.push(item);
    }
}

/// Fills dates and id; returns the overall progress when the block states one.
fn parse_progress_info(
    section: &markdown::Section<'_>,
    scope: &mut ImplementationScope,
    warnings: &mut Vec<ProjectionWarning>,
) -> Option<u32> {
    let mut overall = None;
    for line in section.body.iter().filter(|l| !l.text.trim().is_empty()) {
        let Some((key, value)) = markdown::field(line.text) else {
            warnings.push(ProjectionWarning::new(
                line.number,
                format!("ignored line in progress info: {}", line.text.trim()),
            ));
            continue;
        };
        match key.as_str() {
            "scope id" => scope.id = markdown::inline(&value),
            "overall progress" | "全体進捗" => match markdown::first_number(&value) {
                Some(p) => overall = Some(p),
                None => warnings.push(ProjectionWarning::new(
                    line.number,
                    format!("invalid overall progress '{}'", value.trim()),
                )),
            },
            "start date" | "開始日" => scope.start_date = date_field(&Some(value)),
            "target date" | "目標日" => scope.target_date = date_field(&Some(value)),
            "estimated time" => scope.estimated_time = markdown::inline(&value),
            // Derived counts, recomputed from the items.
            "total items" | "completed items" | "in progress items" | "not started items" => {}
            _ => warnings.push(ProjectionWarning::new(
                line.number,
                format!("unknown progress field '{}'", key),
            )),
        }
    }
    overall
}
