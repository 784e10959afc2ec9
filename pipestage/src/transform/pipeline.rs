//! Stage executor.
//!
//! Runs one stage: load → transformations → validations → write, threading
//! a single [`Container`] through every step in declaration order.
//!
//! # Example
//!
//! ```rust,ignore
//! use pipestage::config::Params;
//! use pipestage::registry::Registry;
//! use pipestage::transform::{RunOptions, StageRunner};
//!
//! let params = Params::from_file("params.yaml")?;
//! let registry = Registry::builtin();
//! let report = StageRunner::new(&params, &registry).run("prepare", &RunOptions::default())?;
//! println!("wrote {} files", report.outputs.len());
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use super::walker::Walker;
use crate::config::{LoadSpec, Params, StageConfig, Step, WriteSpec};
use crate::error::{ConfigError, DataError, StageResult};
use crate::models::{Branches, Container, Mode};
use crate::paths;
use crate::registry::{Load, Registry, Write};

/// Options for a real run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip the validation phase
    pub skip_validation: bool,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Files read by the load phase
    pub inputs: Vec<String>,
    /// Files written, in write order
    pub outputs: Vec<String>,
    pub rows_written: usize,
    pub validations_run: usize,
}

impl RunReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Result of the load phase.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub data: Container,
    /// Sorted dependency paths
    pub deps: Vec<String>,
    /// Global parameters referenced by the load path
    pub param_keys: BTreeSet<String>,
}

/// Executes stages declared in one params file.
pub struct StageRunner<'a> {
    params: &'a Params,
    registry: &'a Registry,
}

impl<'a> StageRunner<'a> {
    pub fn new(params: &'a Params, registry: &'a Registry) -> Self {
        Self { params, registry }
    }

    pub fn params(&self) -> &Params {
        self.params
    }

    /// Typed, checked configuration of a stage.
    pub fn config(&self, stage: &str) -> StageResult<StageConfig> {
        let config = self.params.stage_config(stage)?;
        config.check(stage)?;
        Ok(config)
    }

    /// The registry with the stage's extra modules layered on top.
    pub fn registry_for(&self, config: &StageConfig) -> StageResult<Registry> {
        Ok(self.registry.layered(&config.extra_modules)?)
    }

    /// Resolve the load paths and read them.
    ///
    /// Several files load as a keyed container, one key per file; a single
    /// file loads as a table. In trace mode, or without a format, every
    /// table is replaced by a placeholder.
    pub fn load(&self, spec: &LoadSpec, registry: &Registry, mode: Mode) -> StageResult<Loaded> {
        let patterns = spec.path.patterns();
        let (deps, param_keys) = paths::get_deps(&patterns, self.params, None)?;

        let loader = spec
            .format
            .as_deref()
            .map(|format| registry.resolve::<Load>(format, spec.import_from.as_deref()))
            .transpose()?;
        let read = |dep: &str| -> StageResult<Container> {
            match (&loader, mode) {
                (Some(loader), Mode::Real) => {
                    tracing::info!("loading data from {}", dep);
                    Ok(Container::Leaf(loader.call(Path::new(dep), &spec.kwargs)?))
                }
                _ => Ok(Container::Empty),
            }
        };

        let data = match deps.as_slice() {
            [single] => read(single)?,
            many => {
                let mut branches = Branches::new();
                for dep in many {
                    let key = paths::file_key(dep, &spec.key_map)?;
                    if branches.contains_key(&key) {
                        return Err(ConfigError::InvalidArgument {
                            id: "key_map".to_string(),
                            message: format!("key '{}' is produced by more than one file", key),
                        }
                        .into());
                    }
                    branches.insert(key, read(dep)?);
                }
                Container::Keyed(branches)
            }
        };

        Ok(Loaded {
            data,
            deps,
            param_keys,
        })
    }

    /// Apply transformation steps in order.
    pub fn transform(&self, mut data: Container, steps: &[Step], walker: &Walker<'_>) -> StageResult<Container> {
        for (i, step) in steps.iter().enumerate() {
            tracing::info!("[{}/{}] {}", i + 1, steps.len(), step.label());
            data = walker.transform(data, step)?;
            tracing::debug!("{} produced {} table(s)", step.label(), data.leaf_count());
        }
        Ok(data)
    }

    /// Run validation steps in order; the first failure stops the run.
    pub fn validate(&self, data: &Container, steps: &[Step], walker: &Walker<'_>) -> StageResult<usize> {
        for (i, step) in steps.iter().enumerate() {
            tracing::info!("[{}/{}] validating {}", i + 1, steps.len(), step.label());
            walker.validate(data, step)?;
        }
        Ok(steps.len())
    }

    /// Write every table of `data` through the write spec.
    ///
    /// Returns the written paths. Parent directories are created as needed.
    pub fn write(&self, data: &Container, spec: &WriteSpec, registry: &Registry) -> StageResult<(Vec<String>, usize)> {
        let writer = registry.resolve::<Write>(&spec.format, spec.import_from.as_deref())?;
        let outputs = paths::plan_outputs(data, &spec.path, self.params)?;

        let mut written = Vec::with_capacity(outputs.len());
        let mut rows = 0;
        for output in outputs {
            let Some(table) = output.table else {
                tracing::warn!("no data for {}, skipped", output.path);
                continue;
            };
            let path = Path::new(&output.path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DataError::io(parent.display().to_string(), e))?;
            }
            tracing::info!("writing {} rows to {} as {}", table.len(), output.path, spec.format);
            writer.call(table, path, &spec.kwargs)?;
            rows += table.len();
            written.push(output.path);
        }
        Ok((written, rows))
    }

    /// Run a stage for real.
    pub fn run(&self, stage: &str, options: &RunOptions) -> StageResult<RunReport> {
        let started_at = Utc::now();
        let config = self.config(stage)?;
        let registry = self.registry_for(&config)?;
        let walker = Walker::new(&registry, Mode::Real);
        tracing::info!("running stage '{}'", stage);

        let loaded = self.load(&config.load, &registry, Mode::Real)?;
        tracing::info!(
            "loaded {} file(s), {} rows",
            loaded.deps.len(),
            loaded.data.row_count()
        );

        let data = self.transform(loaded.data, config.transformations(), &walker)?;

        let validations_run = if options.skip_validation {
            tracing::info!("skipping validation");
            0
        } else {
            self.validate(&data, config.validations(), &walker)?
        };

        let (outputs, rows_written) = match &config.write {
            Some(spec) => self.write(&data, spec, &registry)?,
            None => (Vec::new(), 0),
        };

        let report = RunReport {
            stage: stage.to_string(),
            started_at,
            finished_at: Utc::now(),
            inputs: loaded.deps,
            outputs,
            rows_written,
            validations_run,
        };
        tracing::info!(
            "stage '{}' finished in {} ms, {} file(s) written",
            stage,
            report.duration_ms(),
            report.outputs.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DataResult, StageError};
    use crate::models::table::str_arg;
    use crate::models::{Kwargs, Table};
    use crate::registry::{ModuleCatalog, ModuleExports};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::fs;

    fn project(params: &str) -> (tempfile::TempDir, Params) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        fs::create_dir_all(dir.path().join("raw")).unwrap();
        fs::write(
            dir.path().join("raw/sales.csv"),
            "id,amount,day\na,10,2024-01-01\nb,,2024-01-02\nc,30,2024-01-03\nd,40,2024-01-04\n",
        )
        .unwrap();
        fs::write(dir.path().join("raw/returns.csv"), "id,amount,day\nz,5,2024-01-05\n").unwrap();
        let params = Params::from_yaml(&format!("root: {}\n{}", root, params)).unwrap();
        (dir, params)
    }

    #[test]
    fn test_run_split_and_write() {
        let (dir, params) = project(
            r#"
prepare:
  load:
    format: csv
    path: ${root}/raw/sales.csv
  transformations:
    - id: dropna
    - id: split
      by: position
      size: 0.5
      left_split_name: train
      right_split_name: test
  validations:
    - id: no_nans
      reduction: any
      expected: false
  write:
    format: csv
    path: ${root}/out/{key}.csv
"#,
        );
        let registry = Registry::builtin();
        let report = StageRunner::new(&params, &registry)
            .run("prepare", &RunOptions::default())
            .unwrap();

        let root = dir.path().display().to_string();
        assert_eq!(
            report.outputs,
            vec![format!("{}/out/train.csv", root), format!("{}/out/test.csv", root)]
        );
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.validations_run, 1);
        let train = fs::read_to_string(dir.path().join("out/train.csv")).unwrap();
        assert_eq!(train, "id,amount,day\na,10,2024-01-01\nc,30,2024-01-03\n");
    }

    #[test]
    fn test_multi_file_load_is_keyed() {
        let (dir, params) = project(
            r#"
merge:
  load:
    format: csv
    path: ${root}/raw/*.csv
    key_map:
      "^sales$": "current"
  transformations:
    - id: combine
      new_key: all
  write:
    format: json
    path: ${root}/out/all.json
"#,
        );
        let registry = Registry::builtin();
        let runner = StageRunner::new(&params, &registry);
        let config = runner.config("merge").unwrap();

        let loaded = runner.load(&config.load, &registry, Mode::Real).unwrap();
        let Container::Keyed(branches) = &loaded.data else {
            panic!("expected keyed data")
        };
        assert_eq!(branches.keys().collect::<Vec<_>>(), vec!["returns", "current"]);
        assert_eq!(loaded.param_keys.iter().collect::<Vec<_>>(), vec!["root"]);

        let report = runner.run("merge", &RunOptions::default()).unwrap();
        assert_eq!(report.rows_written, 5);
        assert!(dir.path().join("out/all.json").exists());
    }

    #[test]
    fn test_validation_failure_stops_before_write() {
        let (dir, params) = project(
            r#"
check:
  load:
    format: csv
    path: ${root}/raw/sales.csv
  transformations:
    - id: head
      n: 2
  validations:
    - id: no_nans
      reduction: any
      expected: false
  write:
    format: csv
    path: ${root}/out/checked.csv
"#,
        );
        let registry = Registry::builtin();
        let runner = StageRunner::new(&params, &registry);
        let err = runner.run("check", &RunOptions::default()).unwrap_err();
        assert!(matches!(err, StageError::ValidationFailed { .. }));
        assert!(!dir.path().join("out/checked.csv").exists());

        let options = RunOptions { skip_validation: true };
        let report = runner.run("check", &options).unwrap();
        assert_eq!(report.validations_run, 0);
        assert_eq!(report.rows_written, 2);
    }

    #[test]
    fn test_transformations_without_write_fail_fast() {
        let (_dir, params) = project(
            r#"
broken:
  load:
    format: csv
    path: ${root}/raw/sales.csv
  transformations:
    - id: head
"#,
        );
        let registry = Registry::builtin();
        let err = StageRunner::new(&params, &registry)
            .run("broken", &RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::Config(ConfigError::MissingWrite(_))));
    }

    #[test]
    fn test_missing_dependency() {
        let (_dir, params) = project(
            r#"
lost:
  load:
    format: csv
    path: ${root}/raw/nothing_*.csv
"#,
        );
        let registry = Registry::builtin();
        let err = StageRunner::new(&params, &registry)
            .run("lost", &RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::DependencyNotFound { .. }));
    }

    #[test]
    fn test_unknown_extra_module() {
        let (_dir, params) = project(
            r#"
layered:
  load:
    format: csv
    path: ${root}/raw/sales.csv
  extra_modules: [project.steps]
"#,
        );
        let registry = Registry::builtin();
        let err = StageRunner::new(&params, &registry)
            .run("layered", &RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::Registry(_)));
    }

    fn split_by_parity(data: Option<Table>, kwargs: &Kwargs) -> DataResult<Container> {
        let left = str_arg("split", kwargs, "left_split_name")?;
        let right = str_arg("split", kwargs, "right_split_name")?;
        let Some(table) = data else {
            return Ok(Container::keyed([(left, Container::Empty), (right, Container::Empty)]));
        };
        let even: Vec<bool> = (0..table.len()).map(|i| i % 2 == 0).collect();
        let odd: Vec<bool> = even.iter().map(|b| !b).collect();
        Ok(Container::keyed([
            (left, Container::Leaf(table.filter_rows(&even))),
            (right, Container::Leaf(table.filter_rows(&odd))),
        ]))
    }

    fn double_amount(data: Option<Table>, _kwargs: &Kwargs) -> DataResult<Container> {
        let Some(mut table) = data else {
            return Ok(Container::Empty);
        };
        for row in &mut table.rows {
            if let Some(amount) = row.get("amount").and_then(Value::as_i64) {
                row.insert("amount".to_string(), json!(amount * 2));
            }
        }
        Ok(table.into())
    }

    #[test]
    fn test_extra_module_override_and_custom_step() {
        let (dir, params) = project(
            r#"
layered:
  load:
    format: csv
    path: ${root}/raw/sales.csv
  extra_modules: [project.steps]
  transformations:
    - id: dropna
    - id: custom
      import_from: project.features.double_amount
    - id: split
      left_split_name: even
      right_split_name: odd
  write:
    format: csv
    path: ${root}/out/{key}.csv
"#,
        );
        let catalog = ModuleCatalog::new()
            .register("project.steps", ModuleExports::new().with_transformation("split", split_by_parity))
            .register(
                "project.features",
                ModuleExports::new().with_transformation("double_amount", double_amount),
            );
        let registry = Registry::with_catalog(catalog);
        let report = StageRunner::new(&params, &registry)
            .run("layered", &RunOptions::default())
            .unwrap();

        assert_eq!(report.outputs.len(), 2);
        let even = fs::read_to_string(dir.path().join("out/even.csv")).unwrap();
        assert_eq!(even, "id,amount,day\na,20,2024-01-01\nd,80,2024-01-04\n");
        let odd = fs::read_to_string(dir.path().join("out/odd.csv")).unwrap();
        assert_eq!(odd, "id,amount,day\nc,60,2024-01-03\n");

        // the extra module must be registered
        let err = StageRunner::new(&params, &Registry::builtin())
            .run("layered", &RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::Registry(_)));
    }
}
