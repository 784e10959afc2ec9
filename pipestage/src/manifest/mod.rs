//! Manifest synchronizer.
//!
//! The manifest (`dvc.yaml`) holds one entry per stage under `stages:`. The
//! expected entry of a stage is derived from its trace; the synchronizer
//! compares it with the persisted one and can rewrite it.
//!
//! ```yaml
//! stages:
//!   prepare:
//!     cmd: pipestage run prepare
//!     deps: [data/raw.csv]
//!     params: [data_dir, prepare.load.path, ...]
//!     outs: [data/prepared/test.csv, data/prepared/train.csv]
//!     meta:
//!       version: 0.1.0
//! ```

use serde_yaml::{Mapping, Value as Yaml};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{Params, StageConfig};
use crate::error::{ManifestError, ManifestResult, StageResult};
use crate::registry::Registry;
use crate::tracer::{self, Trace};

/// Version recorded in `meta.version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const STAGES: &str = "stages";

fn key(name: &str) -> Yaml {
    Yaml::String(name.to_string())
}

// =============================================================================
// Manifest entry
// =============================================================================

/// One stage entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub cmd: String,
    pub deps: Vec<String>,
    pub params: Vec<String>,
    pub outs: Vec<String>,
    pub meta: Mapping,
    /// `extra_stage_fields`, kept verbatim
    pub extra: Mapping,
}

impl ManifestEntry {
    /// Default command running a stage.
    pub fn default_cmd(stage: &str) -> String {
        format!("pipestage run {}", stage)
    }

    /// Expected entry of a traced stage.
    pub fn from_trace(stage: &str, trace: &Trace, config: &StageConfig) -> Self {
        let mut meta = Mapping::new();
        meta.insert(key("version"), key(VERSION));
        Self {
            cmd: Self::default_cmd(stage),
            deps: trace.deps.clone(),
            params: trace.params.clone(),
            outs: trace.outs.clone(),
            meta,
            extra: config.extra_stage_fields.clone(),
        }
    }

    fn string_list(value: Option<&Yaml>, field: &str) -> ManifestResult<Vec<String>> {
        match value {
            None | Some(Yaml::Null) => Ok(Vec::new()),
            Some(Yaml::Sequence(items)) => items
                .iter()
                .map(|item| match item {
                    Yaml::String(s) => Ok(s.clone()),
                    // dvc allows `- path: {options}` entries
                    Yaml::Mapping(m) if m.len() == 1 => m
                        .keys()
                        .next()
                        .and_then(Yaml::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| ManifestError::Malformed(format!("bad entry in '{}'", field))),
                    _ => Err(ManifestError::Malformed(format!("bad entry in '{}'", field))),
                })
                .collect(),
            Some(_) => Err(ManifestError::Malformed(format!("'{}' must be a list", field))),
        }
    }

    pub fn from_yaml(value: &Yaml) -> ManifestResult<Self> {
        let Yaml::Mapping(map) = value else {
            return Err(ManifestError::Malformed("stage entry must be a mapping".to_string()));
        };
        let cmd = match map.get("cmd") {
            Some(Yaml::String(s)) => s.clone(),
            _ => String::new(),
        };
        let meta = match map.get("meta") {
            Some(Yaml::Mapping(m)) => m.clone(),
            _ => Mapping::new(),
        };
        let mut extra = Mapping::new();
        for (k, v) in map {
            if !matches!(k.as_str(), Some("cmd" | "deps" | "params" | "outs" | "meta")) {
                extra.insert(k.clone(), v.clone());
            }
        }
        Ok(Self {
            cmd,
            deps: Self::string_list(map.get("deps"), "deps")?,
            params: Self::string_list(map.get("params"), "params")?,
            outs: Self::string_list(map.get("outs"), "outs")?,
            meta,
            extra,
        })
    }

    pub fn to_yaml(&self) -> Yaml {
        let list = |items: &[String]| Yaml::Sequence(items.iter().map(|s| key(s)).collect());
        let mut map = Mapping::new();
        map.insert(key("cmd"), key(&self.cmd));
        map.insert(key("deps"), list(self.deps.as_slice()));
        map.insert(key("params"), list(self.params.as_slice()));
        map.insert(key("outs"), list(self.outs.as_slice()));
        map.insert(key("meta"), Yaml::Mapping(self.meta.clone()));
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        Yaml::Mapping(map)
    }

    /// Names of the fields that differ. Lists compare as sets.
    pub fn diff(&self, other: &ManifestEntry) -> Vec<&'static str> {
        let set = |items: &[String]| items.iter().cloned().collect::<BTreeSet<_>>();
        let mut fields = Vec::new();
        if self.cmd != other.cmd {
            fields.push("cmd");
        }
        if set(self.deps.as_slice()) != set(other.deps.as_slice()) {
            fields.push("deps");
        }
        if set(self.params.as_slice()) != set(other.params.as_slice()) {
            fields.push("params");
        }
        if set(self.outs.as_slice()) != set(other.outs.as_slice()) {
            fields.push("outs");
        }
        // other meta keys belong to the user
        if self.meta.get("version") != other.meta.get("version") {
            fields.push("meta");
        }
        if self.extra != other.extra {
            fields.push("extra_stage_fields");
        }
        fields
    }
}

// =============================================================================
// Manifest file
// =============================================================================

/// A manifest file, read whole and written whole.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    root: Mapping,
}

impl Manifest {
    /// Read a manifest; a missing file is an empty manifest.
    pub fn load(path: impl AsRef<Path>) -> ManifestResult<Self> {
        let path = path.as_ref().to_path_buf();
        let root = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<Yaml>(&content)? {
                Yaml::Mapping(root) => root,
                Yaml::Null => Mapping::new(),
                _ => return Err(ManifestError::Malformed("top level must be a mapping".to_string())),
            }
        } else {
            Mapping::new()
        };
        Ok(Self { path, root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stages(&self) -> Option<&Mapping> {
        self.root.get(STAGES).and_then(Yaml::as_mapping)
    }

    pub fn entry(&self, stage: &str) -> ManifestResult<Option<ManifestEntry>> {
        self.stages()
            .and_then(|stages| stages.get(stage))
            .map(ManifestEntry::from_yaml)
            .transpose()
    }

    /// Replace one stage entry, keeping every other entry and key in place.
    pub fn set_entry(&mut self, stage: &str, entry: &ManifestEntry) {
        let stages = self
            .root
            .entry(key(STAGES))
            .or_insert_with(|| Yaml::Mapping(Mapping::new()));
        if !stages.is_mapping() {
            *stages = Yaml::Mapping(Mapping::new());
        }
        if let Yaml::Mapping(stages) = stages {
            stages.insert(key(stage), entry.to_yaml());
        }
    }

    pub fn save(&self) -> ManifestResult<()> {
        let content = serde_yaml::to_string(&self.root)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        tracing::info!("wrote {}", self.path.display());
        Ok(())
    }
}

/// Render one entry as a standalone manifest snippet.
pub fn render_entry(stage: &str, entry: &ManifestEntry) -> ManifestResult<String> {
    let mut stages = Mapping::new();
    stages.insert(key(stage), entry.to_yaml());
    let mut root = Mapping::new();
    root.insert(key(STAGES), Yaml::Mapping(stages));
    Ok(serde_yaml::to_string(&root)?)
}

// =============================================================================
// Confirmation
// =============================================================================

/// Asks whether the manifest may be rewritten.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> ManifestResult<bool>;
}

/// Interactive yes/no prompt on the terminal.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> ManifestResult<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| ManifestError::Prompt(e.to_string()))
    }
}

/// Fixed answer, for `--yes` and tests.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, prompt: &str) -> ManifestResult<bool> {
        tracing::debug!("{} -> {}", prompt, self.0);
        Ok(self.0)
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Compares traced stage entries with the manifest.
pub struct Synchronizer<'a> {
    params: &'a Params,
    registry: &'a Registry,
    manifest_path: PathBuf,
}

impl<'a> Synchronizer<'a> {
    pub fn new(params: &'a Params, registry: &'a Registry, manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            params,
            registry,
            manifest_path: manifest_path.into(),
        }
    }

    /// Entry the manifest should hold for a stage.
    ///
    /// A persisted command mentioning the stage is kept, so hand-edited
    /// commands survive updates. Persisted `meta` keys other than `version`
    /// are kept too.
    pub fn expected(&self, stage: &str, current: Option<&ManifestEntry>) -> StageResult<ManifestEntry> {
        let config = self.params.stage_config(stage)?;
        let trace = tracer::trace(self.params, self.registry, stage)?;
        let mut entry = ManifestEntry::from_trace(stage, &trace, &config);
        if let Some(current) = current {
            if current.cmd.contains(stage) {
                entry.cmd = current.cmd.clone();
            }
            let mut meta = current.meta.clone();
            meta.insert(key("version"), key(VERSION));
            entry.meta = meta;
        }
        Ok(entry)
    }

    fn compare(&self, stage: &str) -> StageResult<(Manifest, ManifestEntry, Vec<&'static str>)> {
        let manifest = Manifest::load(&self.manifest_path)?;
        let current = manifest.entry(stage)?;
        let expected = self.expected(stage, current.as_ref())?;
        let fields = match &current {
            Some(current) => current.diff(&expected),
            None => vec!["stage"],
        };
        Ok((manifest, expected, fields))
    }

    /// Whether the persisted entry matches the traced one.
    pub fn check(&self, stage: &str) -> StageResult<bool> {
        let (_, _, fields) = self.compare(stage)?;
        if fields.is_empty() {
            tracing::debug!("manifest entry for '{}' is up to date", stage);
            Ok(true)
        } else {
            tracing::warn!("manifest entry for '{}' differs in: {}", stage, fields.join(", "));
            Ok(false)
        }
    }

    /// Fail with `OutOfSync` unless the persisted entry is current.
    pub fn ensure_in_sync(&self, stage: &str) -> StageResult<()> {
        let (_, _, fields) = self.compare(stage)?;
        if fields.is_empty() {
            return Ok(());
        }
        Err(ManifestError::OutOfSync {
            stage: stage.to_string(),
            fields: fields.join(", "),
        }
        .into())
    }

    /// Rewrite the stage entry after confirmation.
    ///
    /// Returns `false` when nothing needed changing.
    pub fn update(&self, stage: &str, confirm: &dyn Confirm) -> StageResult<bool> {
        let (mut manifest, expected, fields) = self.compare(stage)?;
        if fields.is_empty() {
            tracing::info!("manifest entry for '{}' is already up to date", stage);
            return Ok(false);
        }

        let prompt = format!(
            "Update stage '{}' in {} ({} changed)?",
            stage,
            manifest.path().display(),
            fields.join(", ")
        );
        if !confirm.confirm(&prompt)? {
            return Err(ManifestError::UpdateDeclined(stage.to_string()).into());
        }

        manifest.set_entry(stage, &expected);
        manifest.save()?;
        Ok(true)
    }
}
