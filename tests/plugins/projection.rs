use projstate::core::assets::REQUIREMENTS_TEMPLATE;
use projstate::plugins::requirements::{
    Priority, RequirementCategory, RequirementItem, RequirementSection, Requirements,
};
use projstate::plugins::scope::{Complexity, ImplementationItem, ImplementationScope, ScopeStatus};

fn req_item(id: &str, title: &str, priority: Priority, category: RequirementCategory) -> RequirementItem {
    RequirementItem {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} as described by the product owner", title),
        priority,
        category,
    }
}

fn scope_item(id: &str, title: &str, status: ScopeStatus, progress: u32) -> ImplementationItem {
    ImplementationItem {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("Build {}", title.to_lowercase()),
        priority: Priority::High,
        complexity: Complexity::Low,
        status,
        progress,
        dependencies: Vec::new(),
        related_files: Vec::new(),
    }
}

#[test]
fn requirements_survive_a_document_round_trip() {
    let requirements = Requirements {
        document: "Internal tool for tracking\nfield inspections.".into(),
        sections: vec![
            RequirementSection {
                id: "glossary".into(),
                title: "Glossary".into(),
                content: "Inspection: a site visit.\n\nReport: the PDF sent afterwards.".into(),
            },
            RequirementSection {
                id: String::new(),
                title: "User Stories".into(),
                content: "- As an inspector I can file a report offline.".into(),
            },
        ],
        extracted_items: vec![
            req_item("r-latency", "Fast search", Priority::Medium, RequirementCategory::NonFunctional),
            req_item("r-login", "Single sign-on", Priority::High, RequirementCategory::Functional),
            req_item("", "Offline mode", Priority::Low, RequirementCategory::Functional),
            req_item("r-audit", "Audit trail: every edit", Priority::High, RequirementCategory::NonFunctional),
        ],
        chat_history: Vec::new(),
    };

    let document = requirements.to_document();
    let parsed = Requirements::from_document(&document);

    assert!(parsed.is_clean(), "unexpected warnings: {:?}", parsed.warnings);
    assert_eq!(parsed.entity, requirements.canonical());
    // Re-rendering the parsed entity is stable.
    assert_eq!(parsed.entity.to_document(), document);

    let titles: Vec<&str> = parsed.entity.extracted_items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Single sign-on", "Offline mode", "Fast search", "Audit trail: every edit"]
    );
    assert_eq!(parsed.entity.extracted_items[1].id, "req-2");
}

#[test]
fn scope_survives_a_document_round_trip() {
    let mut blocked = scope_item("api", "Public API", ScopeStatus::InProgress, 80);
    blocked.dependencies = vec!["auth".into(), "db".into()];
    blocked.related_files = vec!["src/api.rs".into()];
    let scope = ImplementationScope {
        id: "scope-01".into(),
        items: vec![
            scope_item("ui", "Dashboard", ScopeStatus::Pending, 0),
            blocked,
            scope_item("auth", "Login", ScopeStatus::Completed, 100),
            scope_item("docs", "Manual", ScopeStatus::Pending, 10),
        ],
        selected_ids: vec!["auth".into(), "api".into(), "ui".into()],
        estimated_time: "3 weeks".into(),
        total_progress: 40,
        start_date: Some("2026-01-05".into()),
        target_date: None,
    };

    let document = scope.to_document();
    let parsed = ImplementationScope::from_document(&document);

    assert!(parsed.is_clean(), "unexpected warnings: {:?}", parsed.warnings);
    assert_eq!(parsed.entity, scope.canonical());
    assert_eq!(parsed.entity.total_progress, 40);
    assert!(!parsed.entity.is_selected("docs"));
    assert_eq!(parsed.entity.items[1].dependencies, vec!["auth", "db"]);
}

#[test]
fn functional_only_document_parses_without_error() {
    let doc = "\
# Requirements

## Functional Requirements

1. Sign up
   - Description: Create an account with email
   - Priority: high

2. Reset password
   - Description: Email a reset link
";
    let parsed = Requirements::from_document(doc);

    assert!(parsed.is_clean());
    let functional: Vec<&RequirementItem> = parsed.entity.items(RequirementCategory::Functional).collect();
    assert_eq!(functional.len(), 2);
    assert_eq!(functional[0].title, "Sign up");
    assert_eq!(functional[0].priority, Priority::High);
    assert_eq!(functional[1].priority, Priority::Medium);
    assert_eq!(parsed.entity.items(RequirementCategory::NonFunctional).count(), 0);
    assert_eq!(parsed.entity.extracted_items.len(), 2);
}

#[test]
fn hand_written_items_get_positional_ids() {
    let doc = "\
# Requirements

## Functional Requirements

1. Export CSV

## Non-functional Requirements

1. Runs on a laptop
";
    let parsed = Requirements::from_document(doc).entity;
    let ids: Vec<&str> = parsed.extracted_items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["req-1", "req-2"]);
    assert_eq!(parsed.extracted_items[1].category, RequirementCategory::NonFunctional);
}

#[test]
fn unplaceable_lines_become_warnings() {
    let doc = "\
# Requirements

## Functional Requirements

Some stray note
1. Sign up
   - Priority: urgent
   - Owner: alice
";
    let parsed = Requirements::from_document(doc);

    assert_eq!(parsed.entity.extracted_items.len(), 1);
    assert_eq!(parsed.entity.extracted_items[0].priority, Priority::Medium);
    let lines: Vec<usize> = parsed.warnings.iter().map(|w| w.line).collect();
    assert_eq!(lines, vec![5, 7, 8]);
    assert!(parsed.warnings[1].message.contains("urgent"));
}

#[test]
fn template_parses_cleanly() {
    let parsed = Requirements::from_document(REQUIREMENTS_TEMPLATE);
    assert!(parsed.is_clean(), "template warnings: {:?}", parsed.warnings);
    assert_eq!(parsed.entity.items(RequirementCategory::Functional).count(), 2);
    assert_eq!(parsed.entity.items(RequirementCategory::NonFunctional).count(), 2);
}

#[test]
fn scope_document_with_unknown_section_and_bad_fields() {
    let doc = "\
# Implementation Scope

## Completed

1. Login
   - Complexity: enormous

## Backlog

1. Something later

## Progress Info

- Overall Progress: 100%
- Mood: great
";
    let parsed = ImplementationScope::from_document(doc);

    assert_eq!(parsed.entity.items.len(), 1);
    assert_eq!(parsed.entity.items[0].status, ScopeStatus::Completed);
    assert_eq!(parsed.entity.items[0].complexity, Complexity::Medium);
    assert_eq!(parsed.entity.total_progress, 100);
    let lines: Vec<usize> = parsed.warnings.iter().map(|w| w.line).collect();
    assert_eq!(lines, vec![6, 8, 15]);
}

#[test]
fn japanese_headings_and_fields_are_accepted() {
    let doc = "\
# 要件定義

## 機能要件

1. ログイン
   - 説明: メールでログインする
   - 優先度: high

## 非機能要件

準備中...
";
    let parsed = Requirements::from_document(doc);
    assert!(parsed.is_clean());
    assert_eq!(parsed.entity.extracted_items.len(), 1);
    assert_eq!(parsed.entity.extracted_items[0].description, "メールでログインする");
    assert_eq!(parsed.entity.extracted_items[0].priority, Priority::High);
}

#[test]
fn sub_headings_in_free_text_survive_a_round_trip() {
    let requirements = Requirements {
        document: "Overview\n\n## Background\nLegacy system".into(),
        sections: vec![
            RequirementSection {
                id: "snippet".into(),
                title: "Snippet".into(),
                content: "Paste starts here:\n```sh\nprojstate state load".into(),
            },
            RequirementSection {
                id: "notes".into(),
                title: "Notes".into(),
                content: "Intro paragraph.\n\n## Open questions\n\nWho signs off?\n\n\\## kept literally\n### Minor"
                    .into(),
            },
        ],
        extracted_items: vec![req_item("r1", "Login", Priority::High, RequirementCategory::Functional)],
        chat_history: Vec::new(),
    };

    let document = requirements.to_document();
    assert!(document.contains("\n\\## Open questions\n"));
    let parsed = Requirements::from_document(&document);

    assert!(parsed.is_clean(), "unexpected warnings: {:?}", parsed.warnings);
    assert_eq!(parsed.entity, requirements.canonical());
    assert_eq!(parsed.entity.sections.len(), 2);
    assert!(parsed.entity.sections[1].content.ends_with("\\## kept literally\n### Minor"));
}
