//! Per-project state façade.
//!
//! Structured records always go through the tiered store. When the project has a
//! working directory, requirements and scope are also materialized as documents under
//! `<path>/docs/` and read back from there (the document wins over the store, since
//! that is where people edit).

use crate::core::config::StoreConfig;
use crate::core::config_store::{SecondaryTier, SqliteConfigStore};
use crate::core::error::StateError;
use crate::core::events::{EventBus, EventType, FanOut, JsonlEventLog};
use crate::core::pipeline::TieredStore;
use crate::core::registry::{JsonProjectRegistry, Phase, Project, ProjectRegistry};
use crate::core::store::{self, Loaded, ProjectId, Provenance, StateKey};
use crate::core::tier::{BackupTier, PrimaryTier, write_atomic};
use crate::plugins::change_detector::LineDiffDetector;
use crate::plugins::markdown::ProjectionWarning;
use crate::plugins::mockups::{self, Mockup};
use crate::plugins::phases::{self, PhasePublisher};
use crate::plugins::requirements::Requirements;
use crate::plugins::scope::{ImplementationItem, ImplementationScope};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const REQUIREMENTS_DOC: &str = "requirements.md";
pub const SCOPE_DOC: &str = "scope.md";
pub const STRUCTURE_DOC: &str = "structure.md";

/// Where a projected entity was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "from")]
pub enum DocumentSource {
    Document { path: PathBuf },
    Store { provenance: Provenance },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLoad<T> {
    pub entity: T,
    pub source: DocumentSource,
    pub warnings: Vec<ProjectionWarning>,
}

impl<T> DocumentLoad<T> {
    fn from_store(loaded: Loaded<T>) -> Self {
        Self {
            entity: loaded.value,
            source: DocumentSource::Store {
                provenance: loaded.provenance,
            },
            warnings: Vec::new(),
        }
    }

    /// True when nothing was stored anywhere and the entity is a default.
    pub fn is_default(&self) -> bool {
        matches!(
            self.source,
            DocumentSource::Store {
                provenance: Provenance::Default(_)
            }
        )
    }
}

pub struct ProjectState {
    store: TieredStore,
    publisher: PhasePublisher,
    events: EventBus,
    scope_export_dir: Option<PathBuf>,
}

impl ProjectState {
    pub fn new(store: TieredStore, publisher: PhasePublisher) -> Self {
        Self {
            store,
            publisher,
            events: EventBus::new(),
            scope_export_dir: None,
        }
    }

    pub fn with_scope_export_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scope_export_dir = dir;
        self
    }

    /// Wire the default stack: primary and backup files under `state_root`, the
    /// SQLite secondary store, the JSON registry, and an event bus plus optional
    /// JSONL audit log.
    pub fn open(config: &StoreConfig) -> Result<Self, StateError> {
        let secondary = SecondaryTier::new(SqliteConfigStore::open(&config.secondary_db)?);
        let store = TieredStore::new(PrimaryTier::new(&config.state_root))
            .with_tier(Arc::new(BackupTier::new(&config.state_root)))
            .with_tier(Arc::new(secondary))
            .with_heal_mode(config.heal);

        let events = EventBus::new();
        let mut sink = FanOut::new().with_sink(Arc::new(events.clone()));
        if let Some(log) = &config.events_log {
            sink = sink.with_sink(Arc::new(JsonlEventLog::new(log)));
        }

        let registry: Arc<dyn ProjectRegistry> = Arc::new(JsonProjectRegistry::new(&config.registry_file));
        let publisher = PhasePublisher::new(registry, Arc::new(sink))
            .with_policy(config.phase_policy)
            .with_detector(Arc::new(LineDiffDetector::from(config.detector)));

        tracing::debug!(state_root = %config.state_root.display(), heal = ?config.heal, "project state opened");
        Ok(Self {
            store,
            publisher,
            events,
            scope_export_dir: config.scope_export_dir.clone(),
        })
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn publisher(&self) -> &PhasePublisher {
        &self.publisher
    }

    pub fn registry(&self) -> &dyn ProjectRegistry {
        self.publisher.registry()
    }

    /// In-process event bus wired by [`ProjectState::open`]. For a state built with
    /// [`ProjectState::new`] it is not connected to the publisher's sink.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn project(&self, id: &ProjectId) -> Option<Project> {
        match self.registry().get_project(id) {
            Ok(project) => project,
            Err(e) => {
                tracing::warn!(project = %id, error = %e, "project lookup failed");
                None
            }
        }
    }

    fn doc_path(&self, id: &ProjectId, name: &str) -> Option<PathBuf> {
        self.project(id)?.docs_dir().map(|d| d.join(name))
    }

    fn gate(&self, id: &ProjectId, phase: Phase, passed: bool) {
        if let Err(e) = self.publisher.apply_gate(id, phase, passed) {
            tracing::warn!(project = %id, phase = %phase, error = %e, "phase update failed");
        }
    }

    /// Plain record save through the tiered store; no gates, no events.
    pub fn save<T: Serialize + ?Sized>(&self, id: &ProjectId, key: &StateKey, value: &T) -> Result<(), StateError> {
        self.store.save(id, key, value)?;
        Ok(())
    }

    pub fn load<T: Serialize + DeserializeOwned>(&self, id: &ProjectId, key: &StateKey, default: T) -> T {
        self.store.load(id, key, default)
    }

    pub fn save_requirements(&self, id: &ProjectId, requirements: &Requirements) -> Result<(), StateError> {
        self.store.save(id, &StateKey::requirements(), requirements)?;
        let document = requirements.to_document();
        if let Some(path) = self.doc_path(id, REQUIREMENTS_DOC) {
            write_atomic(&path, document.as_bytes())?;
            tracing::info!(project = %id, path = %path.display(), "requirements document written");
        }

        let passed = phases::requirements_gate(self.publisher.detector(), requirements, &document);
        self.gate(id, Phase::Requirements, passed);
        self.publisher.publish(EventType::RequirementsUpdated, id, requirements);
        Ok(())
    }

    /// The document when present (chat history merged from the store), else the store.
    pub fn load_requirements(&self, id: &ProjectId) -> DocumentLoad<Requirements> {
        let stored = self
            .store
            .load_with_provenance(id, &StateKey::requirements(), Requirements::default());
        let Some((path, text)) = self.read_doc(id, REQUIREMENTS_DOC) else {
            return DocumentLoad::from_store(stored);
        };
        let projection = Requirements::from_document(&text);
        let mut entity = projection.entity;
        entity.chat_history = stored.value.chat_history;
        DocumentLoad {
            entity,
            source: DocumentSource::Document { path },
            warnings: projection.warnings,
        }
    }

    fn read_doc(&self, id: &ProjectId, name: &str) -> Option<(PathBuf, String)> {
        let path = self.doc_path(id, name)?;
        match fs::read_to_string(&path) {
            Ok(text) => Some((path, text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(project = %id, path = %path.display(), error = %e, "document unreadable, using store");
                None
            }
        }
    }

    /// Save a scope, assigning an id when it has none. Returns the scope as saved.
    pub fn save_implementation_scope(
        &self,
        id: &ProjectId,
        scope: &ImplementationScope,
    ) -> Result<ImplementationScope, StateError> {
        let mut scope = scope.clone();
        if scope.id.trim().is_empty() {
            scope.id = ImplementationScope::new_id();
        }
        self.store.save(id, &StateKey::implementation_scope(), &scope)?;
        if let Some(path) = self.doc_path(id, SCOPE_DOC) {
            write_atomic(&path, scope.to_document().as_bytes())?;
            tracing::info!(project = %id, path = %path.display(), "scope document written");
        }
        self.export_scope(id, &scope);

        self.gate(id, Phase::Implementation, phases::implementation_gate(&scope));
        self.publisher.publish(EventType::ScopeUpdated, id, &scope);
        Ok(scope)
    }

    /// Copy for external tools at `<scope_export_dir>/<scope id>.json`. Best-effort.
    fn export_scope(&self, id: &ProjectId, scope: &ImplementationScope) {
        let Some(dir) = &self.scope_export_dir else {
            return;
        };
        if let Err(e) = store::validate_segment("scope id", &scope.id) {
            tracing::warn!(project = %id, error = %e, "scope not exported");
            return;
        }
        let path = dir.join(format!("{}.json", scope.id));
        let result = serde_json::to_vec_pretty(scope)
            .map_err(StateError::from)
            .and_then(|bytes| write_atomic(&path, &bytes).map_err(StateError::from));
        match result {
            Ok(_) => tracing::debug!(project = %id, path = %path.display(), "scope exported"),
            Err(e) => tracing::warn!(project = %id, path = %path.display(), error = %e, "scope export failed"),
        }
    }

    pub fn load_implementation_scope(&self, id: &ProjectId) -> DocumentLoad<ImplementationScope> {
        let stored = self
            .store
            .load_with_provenance(id, &StateKey::implementation_scope(), ImplementationScope::default());
        let Some((path, text)) = self.read_doc(id, SCOPE_DOC) else {
            return DocumentLoad::from_store(stored);
        };
        let projection = ImplementationScope::from_document(&text);
        let mut entity = projection.entity;
        if entity.id.is_empty() {
            entity.id = stored.value.id;
        }
        DocumentLoad {
            entity,
            source: DocumentSource::Document { path },
            warnings: projection.warnings,
        }
    }

    /// Replace items and total progress of the current scope. Returns `None` when the
    /// project has no scope yet.
    pub fn update_implementation_progress(
        &self,
        id: &ProjectId,
        items: Vec<ImplementationItem>,
        total_progress: u32,
    ) -> Result<Option<ImplementationScope>, StateError> {
        let current = self.load_implementation_scope(id);
        if current.is_default() {
            tracing::debug!(project = %id, "no scope to update");
            return Ok(None);
        }
        let mut scope = current.entity;
        scope.items = items;
        scope.total_progress = total_progress;
        let saved = self.save_implementation_scope(id, &scope)?;
        self.publisher.publish(
            EventType::ImplementationProgress,
            id,
            &serde_json::json!({ "items": saved.items, "totalProgress": saved.total_progress }),
        );
        Ok(Some(saved))
    }

    /// Write `docs/structure.md`. Returns whether the content left the template; only
    /// then is the design phase gated and the change published.
    pub fn save_structure(&self, id: &ProjectId, content: &str) -> Result<bool, StateError> {
        let path = self
            .doc_path(id, STRUCTURE_DOC)
            .ok_or_else(|| StateError::ValidationError(format!("project {} has no path set", id)))?;
        write_atomic(&path, content.as_bytes())?;
        tracing::info!(project = %id, path = %path.display(), "structure document written");

        let customized = phases::structure_gate(self.publisher.detector(), content);
        if customized {
            self.gate(id, Phase::Design, true);
            self.publisher
                .publish(EventType::ProjectStructureUpdated, id, &serde_json::json!({ "content": content }));
        }
        Ok(customized)
    }

    /// Upsert one mockup by id. Returns the stored list.
    pub fn save_mockup(&self, id: &ProjectId, mockup: &Mockup) -> Result<Vec<Mockup>, StateError> {
        let mut list = self.mockups(id);
        mockups::upsert(&mut list, mockup.clone());
        self.store.save(id, &StateKey::mockups(), &list)?;
        if !list.is_empty() {
            self.gate(id, Phase::Design, true);
        }
        self.publisher.publish(EventType::MockupCreated, id, mockup);
        Ok(list)
    }

    pub fn mockups(&self, id: &ProjectId) -> Vec<Mockup> {
        self.store.load(id, &StateKey::mockups(), Vec::new())
    }

    /// Returns whether the path changed.
    pub fn update_project_path(&self, id: &ProjectId, path: &Path) -> Result<bool, StateError> {
        if path.as_os_str().is_empty() {
            return Err(StateError::ValidationError("project path must not be empty".to_string()));
        }
        if self.registry().get_project(id)?.is_none() {
            return Err(StateError::NotFound(format!("project {}", id)));
        }
        let changed = self.registry().set_path(id, path)?;
        if changed {
            self.publisher.publish(
                EventType::ProjectPathUpdated,
                id,
                &serde_json::json!({ "projectId": id, "projectPath": path }),
            );
        } else {
            tracing::debug!(project = %id, "project path unchanged");
        }
        Ok(changed)
    }

    /// Remove every stored record of the project from every tier, then the registry
    /// entry.
    pub fn delete_project(&self, id: &ProjectId) -> Result<(), StateError> {
        self.store.purge_project(id)?;
        if !self.registry().remove_project(id)? {
            tracing::debug!(project = %id, "project was not registered");
        }
        self.publisher
            .publish(EventType::ProjectDeleted, id, &serde_json::json!({ "id": id }));
        Ok(())
    }

    /// Delete leftover staged writes from interrupted saves.
    pub fn sweep_temp(&self, id: &ProjectId) -> Result<usize, StateError> {
        Ok(self.store.primary().sweep_temp(id)?)
    }
}

