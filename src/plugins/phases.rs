//! Phase gates and change publication.
//!
//! After a successful save the façade asks a gate whether the phase is done, and the
//! publisher applies the answer to the project registry under the configured
//! [`PhasePolicy`]. This is the only place the store talks to the rest of the system.

use crate::core::assets::{REQUIREMENTS_TEMPLATE, STRUCTURE_TEMPLATE};
use crate::core::config::PhasePolicy;
use crate::core::error::StateError;
use crate::core::events::{self, EventSink, EventType};
use crate::core::registry::{Phase, ProjectRegistry};
use crate::core::store::ProjectId;
use crate::plugins::change_detector::{ChangeDetector, LineDiffDetector};
use crate::plugins::markdown;
use crate::plugins::requirements::Requirements;
use crate::plugins::scope::ImplementationScope;
use serde::Serialize;
use std::sync::Arc;

/// Requirements are done once the document has items and has left the template.
pub fn requirements_gate(detector: &dyn ChangeDetector, requirements: &Requirements, document: &str) -> bool {
    !requirements.extracted_items.is_empty()
        && detector.is_customized(&markdown::strip_id_comments(document), REQUIREMENTS_TEMPLATE)
}

pub fn implementation_gate(scope: &ImplementationScope) -> bool {
    scope.total_progress >= 100
}

pub fn structure_gate(detector: &dyn ChangeDetector, document: &str) -> bool {
    detector.is_customized(document, STRUCTURE_TEMPLATE)
}

pub struct PhasePublisher {
    registry: Arc<dyn ProjectRegistry>,
    sink: Arc<dyn EventSink>,
    detector: Arc<dyn ChangeDetector>,
    policy: PhasePolicy,
}

impl PhasePublisher {
    pub fn new(registry: Arc<dyn ProjectRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            sink,
            detector: Arc::new(LineDiffDetector::default()),
            policy: PhasePolicy::default(),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_policy(mut self, policy: PhasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &dyn ProjectRegistry {
        self.registry.as_ref()
    }

    pub fn detector(&self) -> &dyn ChangeDetector {
        self.detector.as_ref()
    }

    pub fn policy(&self) -> PhasePolicy {
        self.policy
    }

    /// Apply one gate result. Returns the resulting flag, or `None` when the project
    /// is not registered.
    pub fn apply_gate(&self, project: &ProjectId, phase: Phase, passed: bool) -> Result<Option<bool>, StateError> {
        let Some(current) = self.registry.get_project(project)? else {
            tracing::debug!(project = %project, phase = %phase, "gate skipped, project not registered");
            return Ok(None);
        };
        if passed {
            if self.registry.mark_complete(project, phase)? {
                self.publish(EventType::PhaseCompleted, project, &serde_json::json!({ "phase": phase }));
            }
            return Ok(Some(true));
        }
        match self.policy {
            PhasePolicy::Monotonic => Ok(Some(current.phases.get(phase))),
            PhasePolicy::Reevaluate => {
                self.registry.mark_incomplete(project, phase)?;
                Ok(Some(false))
            }
        }
    }

    pub fn publish<P: Serialize + ?Sized>(&self, event_type: EventType, project: &ProjectId, payload: &P) {
        match serde_json::to_value(payload) {
            Ok(value) => events::emit(self.sink.as_ref(), event_type, project, value),
            Err(e) => tracing::warn!(project = %project, event = %event_type, error = %e, "event payload not serializable"),
        }
    }
}
