//! projstate: a local, file-backed project state store.
//!
//! **projstate keeps per-project records of a development-automation tool durable
//! without a server.** Every record is a JSON value addressed by `(project id, key)`.
//!
//! # Core Principles
//!
//! - **Local-first**: all state is plain files plus one SQLite settings database
//! - **Self-healing**: a damaged primary copy is restored from the first healthy tier
//! - **Total reads**: `load` never fails; it falls back to the caller's default
//! - **Human-editable**: requirements and scope round-trip through Markdown documents
//!
//! # Architecture
//!
//! ## Tiers
//!
//! - **Primary**: `<state_root>/<project>/<key>.json`, written through a staged temp file
//! - **Backup**: `<key>.json.bak`, the last parseable primary before each commit
//! - **Secondary**: the `settings` table of `settings.db`, mirroring every save
//!
//! ## Projections
//!
//! `Requirements` and `ImplementationScope` map to and from `docs/requirements.md` and
//! `docs/scope.md`. Parsing is total and reports warnings instead of failing.
//!
//! ## Phases
//!
//! Saves feed phase gates that flip the project's workflow flags in the registry and
//! publish change events to subscribers and the JSONL audit log.
//!
//! # Examples
//!
//! ```bash
//! # Register a project with a working directory
//! projstate project create --name demo --path ./demo
//!
//! # Import an edited requirements document
//! projstate requirements import <id> ./demo/docs/requirements.md
//!
//! # See which tiers hold a healthy copy
//! projstate state inspect <id> requirements
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: identifiers, tiers, the save/load pipeline, registry, config, events
//! - [`plugins`]: Markdown projections, phase gates and the [`plugins::project_state::ProjectState`] façade

mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{
    Cli, Command, DocumentCommand, ProjectCommand, StateCommand, StructureCommand,
    TemplateCommand,
};
use crate::core::assets;
use crate::core::config::{self, StoreConfig};
use crate::core::error::StateError;
use crate::core::logging;
use crate::core::pipeline::TierStatus;
use crate::core::registry::{JsonProjectRegistry, Phase, Project};
use crate::core::store::{ProjectId, StateKey};
use crate::plugins::markdown::ProjectionWarning;
use crate::plugins::project_state::ProjectState;
use crate::plugins::requirements::Requirements;
use crate::plugins::scope::ImplementationScope;

use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
    Markdown,
}

fn parse_format(raw: &str, allowed: &[OutputFormat]) -> Result<OutputFormat, StateError> {
    let format = match raw.trim().to_ascii_lowercase().as_str() {
        "text" => OutputFormat::Text,
        "json" => OutputFormat::Json,
        "markdown" | "md" => OutputFormat::Markdown,
        other => return Err(StateError::ValidationError(format!("unknown format '{}'", other))),
    };
    if !allowed.contains(&format) {
        return Err(StateError::ValidationError(format!(
            "format '{}' is not supported here",
            raw
        )));
    }
    Ok(format)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), StateError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_warnings(path: &Path, warnings: &[ProjectionWarning]) {
    for w in warnings {
        eprintln!("{} {}:{}", "warning:".yellow().bold(), path.display(), w);
    }
}

fn require_project(state: &ProjectState, id: &ProjectId) -> Result<Project, StateError> {
    state
        .registry()
        .get_project(id)?
        .ok_or_else(|| StateError::NotFound(format!("project {}", id)))
}

pub fn run() -> Result<(), StateError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let home = match cli.home {
        Some(home) => home,
        None => config::resolve_home()?,
    };
    let config = StoreConfig::load(&home)?;
    tracing::debug!(home = %config.home.display(), "configuration loaded");

    match cli.command {
        Command::Project(project_cli) => run_project(&config, project_cli.command),
        Command::State(state_cli) => run_state(&config, state_cli.command),
        Command::Requirements(req_cli) => run_requirements(&config, req_cli.command),
        Command::Scope(scope_cli) => run_scope(&config, scope_cli.command),
        Command::Structure(structure_cli) => run_structure(&config, structure_cli.command),
        Command::Template(template_cli) => run_template(template_cli.command),
    }
}

fn run_project(config: &StoreConfig, command: ProjectCommand) -> Result<(), StateError> {
    match command {
        ProjectCommand::Create { name, path } => {
            let registry = JsonProjectRegistry::new(&config.registry_file);
            let project = registry.create_project(&name, path)?;
            println!("{}", project.id);
        }
        ProjectCommand::List { format } => {
            let format = parse_format(&format, &[OutputFormat::Text, OutputFormat::Json])?;
            let state = ProjectState::open(config)?;
            let projects = state.registry().list_projects()?;
            if format == OutputFormat::Json {
                return print_json(&projects);
            }
            if projects.is_empty() {
                println!("{}", "no projects".dimmed());
            }
            for p in projects {
                let path = p.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                println!("{}  {}  {}", p.id.as_str().bright_cyan(), p.name.bold(), path.dimmed());
            }
        }
        ProjectCommand::Delete { id } => {
            let id = ProjectId::new(id)?;
            let state = ProjectState::open(config)?;
            state.delete_project(&id)?;
            println!("{} {}", "deleted".red(), id);
        }
        ProjectCommand::Path { id, path } => {
            let id = ProjectId::new(id)?;
            let state = ProjectState::open(config)?;
            if state.update_project_path(&id, &path)? {
                println!("{} {}", "path set".green(), path.display());
            } else {
                println!("{}", "path unchanged".dimmed());
            }
        }
        ProjectCommand::Show { id, format } => {
            let format = parse_format(&format, &[OutputFormat::Text, OutputFormat::Json])?;
            let id = ProjectId::new(id)?;
            let state = ProjectState::open(config)?;
            let project = require_project(&state, &id)?;
            if format == OutputFormat::Json {
                return print_json(&project);
            }
            println!("{} {}", project.name.bold(), project.id.as_str().dimmed());
            if let Some(path) = &project.path {
                println!("path: {}", path.display());
            }
            for phase in Phase::ALL {
                let mark = if project.phases.get(phase) {
                    "done".green()
                } else {
                    "open".yellow()
                };
                println!("  {:<15} {}", phase.as_str(), mark);
            }
        }
        ProjectCommand::Phase { id, phase, incomplete } => {
            let id = ProjectId::new(id)?;
            let phase: Phase = phase.parse()?;
            let state = ProjectState::open(config)?;
            require_project(&state, &id)?;
            let changed = if incomplete {
                state.registry().mark_incomplete(&id, phase)?
            } else {
                state.registry().mark_complete(&id, phase)?
            };
            if !changed {
                println!("{}", "phase unchanged".dimmed());
            } else if incomplete {
                println!("{} {}", phase, "reopened".yellow());
            } else {
                println!("{} {}", phase, "completed".green());
            }
        }
    }
    Ok(())
}

fn run_state(config: &StoreConfig, command: StateCommand) -> Result<(), StateError> {
    let state = ProjectState::open(config)?;
    match command {
        StateCommand::Save { id, key, file, json } => {
            let id = ProjectId::new(id)?;
            let key = StateKey::new(key)?;
            let raw = match (file, json) {
                (Some(path), _) => fs::read_to_string(path)?,
                (None, Some(json)) => json,
                (None, None) => {
                    return Err(StateError::ValidationError(
                        "state save needs --file or --json".to_string(),
                    ));
                }
            };
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            state.save(&id, &key, &value)?;
            println!("{} {}/{}", "saved".green(), id, key);
        }
        StateCommand::Load {
            id,
            key,
            default,
            format,
        } => {
            let format = parse_format(&format, &[OutputFormat::Text, OutputFormat::Json])?;
            let id = ProjectId::new(id)?;
            let key = StateKey::new(key)?;
            let default: serde_json::Value = serde_json::from_str(&default)?;
            let loaded = state.store().load_with_provenance(&id, &key, default);
            state.store().wait_for_heals();
            match format {
                OutputFormat::Json => print_json(&loaded.value)?,
                _ => {
                    let source = match loaded.from_tier() {
                        Some(tier) => tier.to_string().green(),
                        None => "default".yellow(),
                    };
                    println!("source: {}", source);
                    println!("{}", serde_json::to_string_pretty(&loaded.value)?);
                }
            }
        }
        StateCommand::Inspect { id, key, format } => {
            let format = parse_format(&format, &[OutputFormat::Text, OutputFormat::Json])?;
            let id = ProjectId::new(id)?;
            let key = StateKey::new(key)?;
            let reports = state.store().inspect(&id, &key);
            if format == OutputFormat::Json {
                return print_json(&reports);
            }
            for report in reports {
                let status = match &report.status {
                    TierStatus::Parseable => "parseable".green(),
                    TierStatus::Missing => "missing".dimmed(),
                    TierStatus::Unparseable(reason) => format!("unparseable ({})", reason).red(),
                    TierStatus::Error(reason) => format!("error ({})", reason).red(),
                };
                println!("{:<10} {}  {}", report.tier.to_string(), status, report.location.dimmed());
            }
        }
        StateCommand::Sweep { id } => {
            let id = ProjectId::new(id)?;
            let removed = state.sweep_temp(&id)?;
            println!("removed {} temp file(s)", removed);
        }
    }
    Ok(())
}

fn run_requirements(config: &StoreConfig, command: DocumentCommand) -> Result<(), StateError> {
    let state = ProjectState::open(config)?;
    match command {
        DocumentCommand::Import { id, file } => {
            let id = ProjectId::new(id)?;
            let text = fs::read_to_string(&file)?;
            let projection = Requirements::from_document(&text);
            print_warnings(&file, &projection.warnings);
            let mut requirements = projection.entity;
            requirements.chat_history = state.load_requirements(&id).entity.chat_history;
            state.save_requirements(&id, &requirements)?;
            println!(
                "{} {} requirement(s)",
                "imported".green(),
                requirements.extracted_items.len()
            );
        }
        DocumentCommand::Export { id, format } => {
            let format = parse_format(&format, &[OutputFormat::Markdown, OutputFormat::Json])?;
            let id = ProjectId::new(id)?;
            let loaded = state.load_requirements(&id);
            match format {
                OutputFormat::Json => print_json(&loaded.entity)?,
                _ => print!("{}", loaded.entity.to_document()),
            }
        }
    }
    Ok(())
}

fn run_scope(config: &StoreConfig, command: DocumentCommand) -> Result<(), StateError> {
    let state = ProjectState::open(config)?;
    match command {
        DocumentCommand::Import { id, file } => {
            let id = ProjectId::new(id)?;
            let text = fs::read_to_string(&file)?;
            let projection = ImplementationScope::from_document(&text);
            print_warnings(&file, &projection.warnings);
            let mut scope = projection.entity;
            if scope.id.is_empty() {
                scope.id = state.load_implementation_scope(&id).entity.id;
            }
            let saved = state.save_implementation_scope(&id, &scope)?;
            println!(
                "{} {} ({} item(s), {}%)",
                "imported".green(),
                saved.id,
                saved.items.len(),
                saved.total_progress
            );
        }
        DocumentCommand::Export { id, format } => {
            let format = parse_format(&format, &[OutputFormat::Markdown, OutputFormat::Json])?;
            let id = ProjectId::new(id)?;
            let loaded = state.load_implementation_scope(&id);
            match format {
                OutputFormat::Json => print_json(&loaded.entity)?,
                _ => print!("{}", loaded.entity.to_document()),
            }
        }
    }
    Ok(())
}

fn run_structure(config: &StoreConfig, command: StructureCommand) -> Result<(), StateError> {
    let state = ProjectState::open(config)?;
    match command {
        StructureCommand::Save { id, file } => {
            let id = ProjectId::new(id)?;
            let content = fs::read_to_string(&file)?;
            if state.save_structure(&id, &content)? {
                println!("{}", "structure saved".green());
            } else {
                println!("{}", "structure saved (unchanged template)".dimmed());
            }
        }
    }
    Ok(())
}

fn run_template(command: TemplateCommand) -> Result<(), StateError> {
    match command {
        TemplateCommand::List => {
            for name in assets::list_templates() {
                println!("{}", name);
            }
        }
        TemplateCommand::Show { name } => {
            let template = assets::get_template(&name)
                .ok_or_else(|| StateError::NotFound(format!("template {}", name)))?;
            print!("{}", template);
        }
    }
    Ok(())
}
