//! Mockup metadata stored under the `mockups` key as a list.

use crate::core::time;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockupSource {
    Requirements,
    #[default]
    Manual,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mockup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub page_name: String,
    #[serde(default)]
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_path: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub source_type: MockupSource,
}

impl Mockup {
    pub fn new(name: impl Into<String>, html: impl Into<String>) -> Self {
        let now = time::now_millis();
        Self {
            id: time::prefixed_id("mockup"),
            name: name.into(),
            description: None,
            page_id: String::new(),
            page_name: String::new(),
            html: html.into(),
            css: None,
            js: None,
            html_path: None,
            css_path: None,
            js_path: None,
            created_at: now,
            updated_at: now,
            source_type: MockupSource::Manual,
        }
    }
}

/// Replace the entry with the same id, or append. Returns true when appended.
pub fn upsert(list: &mut Vec<Mockup>, mockup: Mockup) -> bool {
    match list.iter_mut().find(|m| m.id == mockup.id) {
        Some(existing) => {
            *existing = mockup;
            false
        }
        None => {
            list.push(mockup);
            true
        }
    }
}
