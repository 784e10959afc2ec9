//! # Pipestage - declarative data stages for DVC pipelines
//!
//! Pipestage runs data-processing stages declared in `params.yaml` and keeps
//! the matching `dvc.yaml` entries in sync with what each stage actually
//! reads and writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Load     │────▶│  Transform  │────▶│  Validate   │────▶│    Write    │
//! │ (glob deps) │     │ (tree walk) │     │ (reduction) │     │ (path plan) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   Tracer    │────▶│  Manifest   │
//!                     │ (no I/O)    │     │ (dvc.yaml)  │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipestage::{Params, Registry, RunOptions, StageRunner};
//!
//! let params = Params::from_file("params.yaml")?;
//! let registry = Registry::builtin();
//! let report = StageRunner::new(&params, &registry).run("prepare", &RunOptions::default())?;
//! println!("wrote {} files", report.outputs.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per concern
//! - [`models`] - Tables and the data container tree
//! - [`config`] - Params file and stage configuration
//! - [`parser`] - CSV decoding with encoding detection
//! - [`registry`] - Operation lookup by name
//! - [`builtins`] - Builtin loaders, transformations and writers
//! - [`validation`] - Builtin validators and reductions
//! - [`paths`] - Placeholder substitution, globbing and output planning
//! - [`transform`] - Tree walking, combine and the stage runner
//! - [`tracer`] - Shape-only evaluation of a stage
//! - [`manifest`] - `dvc.yaml` synchronization
//! - [`logging`] - Subscriber setup for the CLI

// Core modules
pub mod error;
pub mod models;

// Configuration
pub mod config;

// Parsing
pub mod parser;

// Operations
pub mod builtins;
pub mod registry;
pub mod validation;

// Stage execution
pub mod paths;
pub mod transform;

// Manifest
pub mod manifest;
pub mod tracer;

// Logging
pub mod logging;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    DataError,
    ManifestError,
    RegistryError,
    StageError,
    StageResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{Branches, Container, Kwargs, Mode, Signal, Table};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{LoadSpec, Params, ProjectPaths, StageConfig, Step, WriteSpec};

// =============================================================================
// Re-exports - Registry
// =============================================================================

pub use registry::{ModuleCatalog, ModuleExports, Registry};

// =============================================================================
// Re-exports - Execution
// =============================================================================

pub use transform::{RunOptions, RunReport, StageRunner};
pub use tracer::{trace, Trace};

// =============================================================================
// Re-exports - Manifest
// =============================================================================

pub use manifest::{AutoConfirm, Confirm, Manifest, ManifestEntry, Synchronizer, TerminalConfirm};
