//! Stage configuration.
//!
//! Stages are declared in a YAML params file (`params.yaml` by default), one
//! top-level key per stage. Remaining top-level keys are global parameters
//! that paths may reference as `${name}`.
//!
//! ```yaml
//! data_dir: data
//! prepare:
//!   load:
//!     format: csv
//!     path: ${data_dir}/raw/*.csv
//!   transformations:
//!     - id: split
//!       by: position
//!       size: 0.8
//!       left_split_name: train
//!       right_split_name: test
//!   write:
//!     format: csv
//!     path: ${data_dir}/prepared/{key}.csv
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::models::Kwargs;
use crate::validation::Reduction;

/// Default params file consulted by the CLI.
pub const DEFAULT_PARAMS_FILE: &str = "params.yaml";

/// Default manifest file consulted by the CLI.
pub const DEFAULT_MANIFEST_FILE: &str = "dvc.yaml";

// =============================================================================
// Params
// =============================================================================

/// Parsed params file.
#[derive(Debug, Clone, Default)]
pub struct Params {
    root: Mapping,
}

impl Params {
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let value: Yaml = serde_yaml::from_str(yaml)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Yaml) -> Self {
        match value {
            Yaml::Mapping(root) => Self { root },
            _ => Self::default(),
        }
    }

    /// Raw configuration of one stage.
    pub fn stage(&self, name: &str) -> ConfigResult<&Yaml> {
        self.root
            .get(name)
            .ok_or_else(|| ConfigError::UnknownStage(name.to_string()))
    }

    /// Global parameter rendered as a path fragment.
    ///
    /// Only scalars can be substituted into paths.
    pub fn scalar(&self, name: &str) -> Option<String> {
        match self.root.get(name)? {
            Yaml::String(s) => Some(s.clone()),
            Yaml::Number(n) => Some(n.to_string()),
            Yaml::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Typed configuration of one stage.
    pub fn stage_config(&self, name: &str) -> ConfigResult<StageConfig> {
        let raw = self.stage(name)?.clone();
        serde_yaml::from_value(raw).map_err(|e| ConfigError::Invalid {
            stage: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Dot-joined keys of every leaf in the stage configuration, prefixed by
    /// the stage name.
    pub fn stage_param_keys(&self, name: &str) -> ConfigResult<Vec<String>> {
        let raw = self.stage(name)?;
        let mut keys = Vec::new();
        flatten_keys(raw, name, &mut keys);
        Ok(keys)
    }
}

/// Collect dot-paths of leaves. Non-empty mappings are descended into;
/// sequences, scalars and empty mappings are leaves.
pub fn flatten_keys(value: &Yaml, prefix: &str, out: &mut Vec<String>) {
    match value {
        Yaml::Mapping(map) if !map.is_empty() => {
            for (k, v) in map {
                let key = match k {
                    Yaml::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                };
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_keys(v, &path, out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

// =============================================================================
// Stage Configuration
// =============================================================================

/// One or several path patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    One(String),
    Many(Vec<String>),
}

impl PathSpec {
    pub fn patterns(&self) -> Vec<&str> {
        match self {
            PathSpec::One(p) => vec![p.as_str()],
            PathSpec::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

/// `load` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSpec {
    /// Loader name; `null` skips loading and yields an empty placeholder
    #[serde(default)]
    pub format: Option<String>,

    /// Input path pattern(s)
    pub path: PathSpec,

    /// Ordered regex → replacement rules applied to file-stem keys
    #[serde(default)]
    pub key_map: Kwargs,

    /// `<module>.<symbol>` when `format` is `custom`
    #[serde(default)]
    pub import_from: Option<String>,

    /// Forwarded to the loader
    #[serde(flatten)]
    pub kwargs: Kwargs,
}

/// `write` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteSpec {
    /// Writer name
    pub format: String,

    /// Output path template with optional `{key}` / `{item}` slots
    pub path: String,

    /// `<module>.<symbol>` when `format` is `custom`
    #[serde(default)]
    pub import_from: Option<String>,

    /// Forwarded to the writer
    #[serde(flatten)]
    pub kwargs: Kwargs,
}

/// One entry of `transformations` or `validations`.
///
/// Built fresh from configuration for every step and never mutated while
/// the step runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Operation name; `custom` resolves `import_from`
    pub id: String,

    #[serde(default)]
    pub import_from: Option<String>,

    /// Key patterns the step applies to (all when empty)
    #[serde(default)]
    pub include: Vec<String>,

    /// Key patterns the step never applies to
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Inject the current branch key as the `key` argument
    #[serde(default)]
    pub pass_key_to_fn: bool,

    /// Progress label, never forwarded
    #[serde(default)]
    pub description: Option<String>,

    /// Validation only: how to reduce the raw signal
    #[serde(default)]
    pub reduction: Reduction,

    /// Validation only: value the reduced signal must equal
    #[serde(default = "default_expected")]
    pub expected: bool,

    /// Operation-specific arguments
    #[serde(flatten)]
    pub kwargs: Kwargs,
}

fn default_expected() -> bool {
    true
}

impl Step {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            import_from: None,
            include: Vec::new(),
            exclude: Vec::new(),
            pass_key_to_fn: false,
            description: None,
            reduction: Reduction::default(),
            expected: true,
            kwargs: Kwargs::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    pub fn with_include(mut self, patterns: &[&str]) -> Self {
        self.include = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_exclude(mut self, patterns: &[&str]) -> Self {
        self.exclude = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_expectation(mut self, reduction: Reduction, expected: bool) -> Self {
        self.reduction = reduction;
        self.expected = expected;
        self
    }

    pub fn passing_key(mut self) -> Self {
        self.pass_key_to_fn = true;
        self
    }

    /// Label shown in progress logs.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.id)
    }
}

/// Everything declared for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub load: LoadSpec,

    #[serde(default)]
    pub transformations: Option<Vec<Step>>,

    #[serde(default)]
    pub validations: Option<Vec<Step>>,

    #[serde(default)]
    pub write: Option<WriteSpec>,

    #[serde(default)]
    pub extra_deps: Vec<String>,

    #[serde(default)]
    pub extra_outs: Vec<String>,

    /// Copied verbatim into the manifest entry
    #[serde(default)]
    pub extra_stage_fields: Mapping,

    /// Registered modules layered over the builtins, later ones winning
    #[serde(default)]
    pub extra_modules: Vec<String>,
}

impl StageConfig {
    /// Structural invariants checked before anything is loaded.
    pub fn check(&self, stage: &str) -> ConfigResult<()> {
        if self.transformations.is_some() && self.write.is_none() {
            return Err(ConfigError::MissingWrite(stage.to_string()));
        }
        Ok(())
    }

    pub fn transformations(&self) -> &[Step] {
        self.transformations.as_deref().unwrap_or(&[])
    }

    pub fn validations(&self) -> &[Step] {
        self.validations.as_deref().unwrap_or(&[])
    }
}

/// File locations used by the CLI.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub params: PathBuf,
    pub manifest: PathBuf,
}

impl Default for ProjectPaths {
    fn default() -> Self {
        Self {
            params: PathBuf::from(DEFAULT_PARAMS_FILE),
            manifest: PathBuf::from(DEFAULT_MANIFEST_FILE),
        }
    }
}
