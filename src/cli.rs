//! CLI struct definitions for the `projstate` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "projstate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local project state store: tiered self-healing persistence with Markdown projections."
)]
pub(crate) struct Cli {
    /// State home (defaults to $PROJSTATE_HOME, then ~/.projstate).
    #[clap(long, global = true)]
    pub home: Option<PathBuf>,
    /// Debug logging to stderr (PROJSTATE_LOG overrides).
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Project registry and phases
    Project(ProjectCli),
    /// Raw record access through the tiered store
    State(StateCli),
    /// Requirements document projection
    Requirements(RequirementsCli),
    /// Implementation scope document projection
    Scope(ScopeCli),
    /// Directory structure document
    Structure(StructureCli),
    /// Embedded initial document templates
    Template(TemplateCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct ProjectCli {
    #[clap(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ProjectCommand {
    /// Register a new project
    Create {
        #[clap(long)]
        name: String,
        /// Working directory; documents are written under <path>/docs
        #[clap(long)]
        path: Option<PathBuf>,
    },
    /// List registered projects
    List {
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Delete a project and every stored record of it
    Delete { id: String },
    /// Set the project working directory
    Path { id: String, path: PathBuf },
    /// Show project metadata and phase flags
    Show {
        id: String,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Set or clear a phase flag explicitly
    Phase {
        id: String,
        phase: String,
        /// Clear the flag instead of setting it
        #[clap(long)]
        incomplete: bool,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct StateCli {
    #[clap(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StateCommand {
    /// Save a JSON value
    Save {
        id: String,
        key: String,
        /// Read the value from a file
        #[clap(long, conflicts_with = "json")]
        file: Option<PathBuf>,
        /// Inline JSON value
        #[clap(long)]
        json: Option<String>,
    },
    /// Load a value (never fails; prints the default when nothing is readable)
    Load {
        id: String,
        key: String,
        /// JSON default
        #[clap(long, default_value = "null")]
        default: String,
        #[clap(long, default_value = "json")]
        format: String,
    },
    /// Per-tier health of one record
    Inspect {
        id: String,
        key: String,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Remove leftover temp files from interrupted saves
    Sweep { id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct RequirementsCli {
    #[clap(subcommand)]
    pub command: DocumentCommand,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ScopeCli {
    #[clap(subcommand)]
    pub command: DocumentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum DocumentCommand {
    /// Parse a Markdown document and save the entity
    Import { id: String, file: PathBuf },
    /// Print the stored entity as Markdown (or JSON)
    Export {
        id: String,
        #[clap(long, default_value = "markdown")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct StructureCli {
    #[clap(subcommand)]
    pub command: StructureCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StructureCommand {
    /// Write docs/structure.md for a project with a path
    Save { id: String, file: PathBuf },
}

#[derive(clap::Args, Debug)]
pub(crate) struct TemplateCli {
    #[clap(subcommand)]
    pub command: TemplateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TemplateCommand {
    /// List template names
    List,
    /// Print a template
    Show { name: String },
}
