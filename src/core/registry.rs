//! Project registry: project metadata and workflow phase flags.
//!
//! The state store does not own project metadata; it consumes it through
//! [`ProjectRegistry`]. [`JsonProjectRegistry`] is the file-backed implementation used
//! by the CLI, persisted with the same staged-rename commit as the primary tier.

use crate::core::error::StateError;
use crate::core::store::ProjectId;
use crate::core::tier::write_atomic;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Requirements,
    Design,
    Implementation,
    Testing,
    Deployment,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Requirements,
        Phase::Design,
        Phase::Implementation,
        Phase::Testing,
        Phase::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Requirements => "requirements",
            Phase::Design => "design",
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
            Phase::Deployment => "deployment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| StateError::ValidationError(format!("unknown phase '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPhases {
    pub requirements: bool,
    pub design: bool,
    pub implementation: bool,
    pub testing: bool,
    pub deployment: bool,
}

impl ProjectPhases {
    pub fn get(&self, phase: Phase) -> bool {
        match phase {
            Phase::Requirements => self.requirements,
            Phase::Design => self.design,
            Phase::Implementation => self.implementation,
            Phase::Testing => self.testing,
            Phase::Deployment => self.deployment,
        }
    }

    pub fn set(&mut self, phase: Phase, done: bool) {
        let flag = match phase {
            Phase::Requirements => &mut self.requirements,
            Phase::Design => &mut self.design,
            Phase::Implementation => &mut self.implementation,
            Phase::Testing => &mut self.testing,
            Phase::Deployment => &mut self.deployment,
        };
        *flag = done;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Project working directory; projected documents live under `<path>/docs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub phases: ProjectPhases,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        let now = time::now_millis();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            path: None,
            status: ProjectStatus::Active,
            phases: ProjectPhases::default(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn docs_dir(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.join("docs"))
    }
}

pub trait ProjectRegistry: Send + Sync {
    fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StateError>;

    fn list_projects(&self) -> Result<Vec<Project>, StateError>;

    /// Register `project`; fails if the id is taken.
    fn insert_project(&self, project: Project) -> Result<(), StateError>;

    /// Returns whether the project existed.
    fn remove_project(&self, id: &ProjectId) -> Result<bool, StateError>;

    /// Set a phase flag. Returns whether the flag changed.
    fn mark_complete(&self, id: &ProjectId, phase: Phase) -> Result<bool, StateError>;

    fn mark_incomplete(&self, id: &ProjectId, phase: Phase) -> Result<bool, StateError>;

    /// Returns whether the path changed.
    fn set_path(&self, id: &ProjectId, path: &Path) -> Result<bool, StateError>;

    /// Bump `updatedAt`.
    fn touch(&self, id: &ProjectId) -> Result<(), StateError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    projects: Vec<Project>,
}

/// `projects.json` on disk; every mutation is a read-modify-write under one mutex.
#[derive(Debug)]
pub struct JsonProjectRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonProjectRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create and register a project with a fresh id.
    pub fn create_project(&self, name: &str, path: Option<PathBuf>) -> Result<Project, StateError> {
        if name.trim().is_empty() {
            return Err(StateError::ValidationError("project name must not be empty".to_string()));
        }
        let id = ProjectId::new(time::prefixed_id("project"))?;
        let mut project = Project::new(id, name.trim());
        project.path = path;
        self.insert_project(project.clone())?;
        tracing::info!(project = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    fn read(&self) -> Result<RegistryFile, StateError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, file: &RegistryFile) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(file)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut RegistryFile) -> Result<(R, bool), StateError>) -> Result<R, StateError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StateError::ValidationError("project registry lock poisoned".to_string()))?;
        let mut file = self.read()?;
        let (out, dirty) = f(&mut file)?;
        if dirty {
            self.write(&file)?;
        }
        Ok(out)
    }

    fn update_project<R>(
        &self,
        id: &ProjectId,
        f: impl FnOnce(&mut Project) -> (R, bool),
    ) -> Result<R, StateError> {
        self.mutate(|file| {
            let project = file
                .projects
                .iter_mut()
                .find(|p| &p.id == id)
                .ok_or_else(|| StateError::NotFound(format!("project {}", id)))?;
            let (out, changed) = f(project);
            if changed {
                project.updated_at = time::now_millis();
            }
            Ok((out, changed))
        })
    }

    fn set_phase(&self, id: &ProjectId, phase: Phase, done: bool) -> Result<bool, StateError> {
        let changed = self.update_project(id, |project| {
            let changed = project.phases.get(phase) != done;
            project.phases.set(phase, done);
            (changed, changed)
        })?;
        if changed {
            tracing::info!(project = %id, phase = %phase, done, "phase updated");
        }
        Ok(changed)
    }
}

impl ProjectRegistry for JsonProjectRegistry {
    fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StateError> {
        Ok(self.read()?.projects.into_iter().find(|p| &p.id == id))
    }

    fn list_projects(&self) -> Result<Vec<Project>, StateError> {
        Ok(self.read()?.projects)
    }

    fn insert_project(&self, project: Project) -> Result<(), StateError> {
        self.mutate(|file| {
            if file.projects.iter().any(|p| p.id == project.id) {
                return Err(StateError::ValidationError(format!(
                    "project {} already exists",
                    project.id
                )));
            }
            file.projects.push(project);
            Ok(((), true))
        })
    }

    fn remove_project(&self, id: &ProjectId) -> Result<bool, StateError> {
        self.mutate(|file| {
            let before = file.projects.len();
            file.projects.retain(|p| &p.id != id);
            let removed = file.projects.len() != before;
            Ok((removed, removed))
        })
    }

    fn mark_complete(&self, id: &ProjectId, phase: Phase) -> Result<bool, StateError> {
        self.set_phase(id, phase, true)
    }

    fn mark_incomplete(&self, id: &ProjectId, phase: Phase) -> Result<bool, StateError> {
        self.set_phase(id, phase, false)
    }

    fn set_path(&self, id: &ProjectId, path: &Path) -> Result<bool, StateError> {
        self.update_project(id, |project| {
            let changed = project.path.as_deref() != Some(path);
            project.path = Some(path.to_path_buf());
            (changed, changed)
        })
    }

    fn touch(&self, id: &ProjectId) -> Result<(), StateError> {
        self.update_project(id, |_| ((), true))
    }
}
