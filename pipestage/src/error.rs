//! Error types for the stage runner.
//!
//! One error type per concern, joined under [`StageError`]:
//!
//! - [`ConfigError`] - malformed or incomplete stage configuration
//! - [`RegistryError`] - operation names that cannot be resolved
//! - [`DataError`] - failures while reading, transforming or writing tables
//! - [`ManifestError`] - reading, comparing and rewriting `dvc.yaml`
//! - [`StageError`] - top-level error returned by runs and traces
//!
//! Conversion is automatic via `From`, so `?` works across boundaries.

use thiserror::Error;

use crate::validation::Reduction;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors in the declared stage configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The params file has no entry for the stage.
    #[error("Stage '{0}' is not declared in the params file")]
    UnknownStage(String),

    /// The stage entry could not be deserialized.
    #[error("Invalid configuration for stage '{stage}': {message}")]
    Invalid { stage: String, message: String },

    /// Transformations are declared but nothing writes their result.
    #[error("Stage '{0}' declares transformations but no 'write' section")]
    MissingWrite(String),

    /// A `${name}` placeholder has no value.
    #[error("No value for placeholder '${{{name}}}' in path '{path}'")]
    MissingPlaceholder { name: String, path: String },

    /// A path template cannot fan out over the data shape.
    #[error("Path template '{path}' must contain a '{{{slot}}}' slot to write {shape} data")]
    MissingSlot {
        path: String,
        slot: &'static str,
        shape: &'static str,
    },

    /// Unbalanced braces or an unknown slot in a path template.
    #[error("Malformed path template '{path}': {message}")]
    MalformedTemplate { path: String, message: String },

    /// Two branches resolve to the same output path.
    #[error("Output path '{0}' is produced by more than one branch")]
    DuplicateOutput(String),

    /// Two branches end up under the same key.
    #[error("Key '{0}' is produced by more than one branch")]
    DuplicateKey(String),

    /// An include/exclude or key-map pattern is not a valid regex.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A required keyword argument is missing or has the wrong type.
    #[error("Operation '{id}': {message}")]
    InvalidArgument { id: String, message: String },

    /// Params file could not be read.
    #[error("Failed to read params file: {0}")]
    Io(#[from] std::io::Error),

    /// Params file is not valid YAML.
    #[error("Failed to parse params file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors while resolving an operation name.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No builtin, custom or native operation has this name.
    #[error("{kind} operation '{id}' not found")]
    OperationNotFound { kind: &'static str, id: String },

    /// `import_from` names a module nobody registered.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// The module exists but does not export the symbol.
    #[error("Module '{module}' has no {kind} function '{symbol}'")]
    SymbolNotFound {
        kind: &'static str,
        module: String,
        symbol: String,
    },

    /// `import_from` is missing or is not `<module>.<symbol>`.
    #[error("Invalid import path '{0}', expected '<module>.<symbol>'")]
    InvalidImport(String),
}

// =============================================================================
// Data Errors
// =============================================================================

/// Errors raised while reading, transforming or writing tables.
#[derive(Debug, Error)]
pub enum DataError {
    /// Failed to read or write a file.
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV decoding or encoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] crate::parser::CsvError),

    /// CSV writer failure.
    #[error("CSV writer error: {0}")]
    CsvWriter(#[from] csv::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema given to a validator is itself invalid.
    #[error("Invalid schema: {0}")]
    Schema(String),

    /// A column referenced by an operation does not exist.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A leaf operation failed.
    #[error("Operation '{id}' failed: {message}")]
    OperationFailed { id: String, message: String },
}

impl DataError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        DataError::OperationFailed {
            id: id.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Manifest Errors
// =============================================================================

/// Errors from the manifest synchronizer.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest file could not be read or written.
    #[error("Manifest IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest file is not valid YAML.
    #[error("Manifest YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Manifest has an unexpected layout.
    #[error("Malformed manifest: {0}")]
    Malformed(String),

    /// The persisted stage entry differs from the traced one.
    #[error("Manifest entry for stage '{stage}' is out of sync ({fields}); run 'pipestage update-config {stage}'")]
    OutOfSync { stage: String, fields: String },

    /// The user declined to rewrite the manifest.
    #[error("Manifest update for stage '{0}' declined")]
    UpdateDeclined(String),

    /// The confirmation prompt failed.
    #[error("Confirmation prompt failed: {0}")]
    Prompt(String),
}

// =============================================================================
// Stage Errors (top-level)
// =============================================================================

/// Top-level error of a stage run or trace.
///
/// Every failure propagates unchanged to the caller; nothing is retried.
#[derive(Debug, Error)]
pub enum StageError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation resolution error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Data error.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Manifest error.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// A dependency pattern matched no file.
    #[error("Dependencies not found for path \"{pattern}\". Is the DVC pipeline up to date?")]
    DependencyNotFound { pattern: String },

    /// A validation did not yield the expected value.
    #[error("Validation '{id}' failed at '{key_path}': {reduction} returned {actual}, expected {expected}")]
    ValidationFailed {
        id: String,
        key_path: String,
        reduction: Reduction,
        actual: String,
        expected: bool,
    },

    /// Combine found no data to concatenate.
    #[error("Nothing to combine into '{new_key}'")]
    EmptyCombine { new_key: String },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for operation resolution.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for leaf data operations.
pub type DataResult<T> = Result<T, DataError>;

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Result type for stage runs and traces.
pub type StageResult<T> = Result<T, StageError>;
