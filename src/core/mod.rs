//! Storage foundation for projstate.
//!
//! Identifiers, tiers, the save/load pipeline, configuration, the project registry
//! and the event plumbing live here. Document projections live in [`crate::plugins`].

pub mod assets;
pub mod config;
pub mod config_store;
pub mod db;
pub mod error;
pub mod events;
pub mod locks;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod tier;
pub mod time;
