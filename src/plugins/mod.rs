//! Projections and the per-project state façade built on the core store.

pub mod change_detector;
pub mod markdown;
pub mod mockups;
pub mod phases;
pub mod project_state;
pub mod requirements;
pub mod scope;
