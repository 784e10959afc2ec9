//! Shape-only evaluation of a stage.
//!
//! Runs the same load → transform → write sequence as a real run, with every
//! table replaced by an empty placeholder, to learn which files a stage
//! depends on, which parameters it reads and which files it writes. Nothing
//! is read or written. Validations are skipped.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::Params;
use crate::error::StageResult;
use crate::models::Mode;
use crate::paths;
use crate::registry::Registry;
use crate::transform::{StageRunner, Walker};

/// What a stage touches, each list sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Trace {
    pub deps: Vec<String>,
    pub params: Vec<String>,
    pub outs: Vec<String>,
}

/// Trace one stage.
pub fn trace(params: &Params, registry: &Registry, stage: &str) -> StageResult<Trace> {
    let runner = StageRunner::new(params, registry);
    let config = runner.config(stage)?;
    let registry = runner.registry_for(&config)?;
    let walker = Walker::new(&registry, Mode::Trace);
    tracing::debug!("tracing stage '{}'", stage);

    let loaded = runner.load(&config.load, &registry, Mode::Trace)?;
    let mut deps: BTreeSet<String> = loaded.deps.into_iter().collect();
    let mut param_keys: BTreeSet<String> = params.stage_param_keys(stage)?.into_iter().collect();
    param_keys.extend(loaded.param_keys);

    let data = runner.transform(loaded.data, config.transformations(), &walker)?;

    let mut outs = BTreeSet::new();
    if let Some(write) = &config.write {
        outs.extend(paths::get_outs(&data, &write.path, params)?);
    }

    for dep in &config.extra_deps {
        deps.insert(paths::parse_path(dep, params, None)?.0);
    }
    for out in &config.extra_outs {
        outs.insert(paths::parse_path(out, params, None)?.0);
    }

    Ok(Trace {
        deps: deps.into_iter().collect(),
        params: param_keys.into_iter().collect(),
        outs: outs.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, StageError};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn project(stages: &str) -> (tempfile::TempDir, Params) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("raw")).unwrap();
        fs::write(dir.path().join("raw/a.csv"), "x\n1\n").unwrap();
        fs::write(dir.path().join("raw/b.csv"), "x\n2\n").unwrap();
        let root = dir.path().display().to_string();
        let params = Params::from_yaml(&format!("root: {}\n{}", root, stages)).unwrap();
        (dir, params)
    }

    #[test]
    fn test_scalar_load_with_key_placeholder_fails() {
        let (_dir, params) = project(
            r#"
plain:
  load:
    format: csv
    path: [ "${root}/raw/a.csv" ]
  write:
    format: csv
    path: out/${key}.csv
"#,
        );
        let err = trace(&params, &Registry::builtin(), "plain").unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::MissingPlaceholder { ref name, .. }) if name == "key"
        ));
    }

    #[test]
    fn test_split_fans_out_outputs() {
        let (dir, params) = project(
            r#"
prepare:
  load:
    format: csv
    path: ${root}/raw/a.csv
  transformations:
    - id: split
      by: id
      id_col: x
      size: 0.5
      left_split_name: train
      right_split_name: test
  write:
    format: csv
    path: ${root}/out/{key}.csv
  extra_deps: [src/prepare.py]
"#,
        );
        let root = dir.path().display().to_string();
        let traced = trace(&params, &Registry::builtin(), "prepare").unwrap();

        assert_eq!(traced.deps, vec![format!("{}/raw/a.csv", root), "src/prepare.py".to_string()]);
        assert_eq!(
            traced.outs,
            vec![format!("{}/out/test.csv", root), format!("{}/out/train.csv", root)]
        );
        assert!(traced.params.contains(&"root".to_string()));
        assert!(traced.params.contains(&"prepare.transformations".to_string()));
        assert!(traced.params.contains(&"prepare.load.path".to_string()));
    }

    #[test]
    fn test_multi_file_load_traces_keyed_outputs() {
        let (dir, params) = project(
            r#"
copy:
  load:
    format: csv
    path: ${root}/raw/*.csv
  write:
    format: json
    path: ${root}/out/{key}.json
"#,
        );
        let root = dir.path().display().to_string();
        let traced = trace(&params, &Registry::builtin(), "copy").unwrap();
        assert_eq!(
            traced.outs,
            vec![format!("{}/out/a.json", root), format!("{}/out/b.json", root)]
        );
    }

    #[test]
    fn test_trace_is_deterministic() {
        let (_dir, params) = project(
            r#"
merge:
  load:
    format: csv
    path: ${root}/raw/*.csv
  transformations:
    - id: combine
    - id: filter
      column: x
      pattern: "1"
  write:
    format: csv
    path: ${root}/out/merged.csv
"#,
        );
        let registry = Registry::builtin();
        let first = trace(&params, &registry, "merge").unwrap();
        let second = trace(&params, &registry, "merge").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.outs.len(), 1);
        assert_eq!(first.deps.len(), 2);
    }

    #[test]
    fn test_trace_writes_nothing() {
        let (dir, params) = project(
            r#"
prepare:
  load:
    format: csv
    path: ${root}/raw/a.csv
  transformations:
    - id: head
  write:
    format: csv
    path: ${root}/out/a.csv
"#,
        );
        trace(&params, &Registry::builtin(), "prepare").unwrap();
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_null_format_skips_loading() {
        let (_dir, params) = project(
            r#"
foreach:
  load:
    format: null
    path: ${root}/raw/${item}.csv
"#,
        );
        let traced = trace(&params, &Registry::builtin(), "foreach").unwrap();
        assert_eq!(traced.deps.len(), 1);
        assert!(traced.deps[0].ends_with("/raw/${item}.csv"));
        assert!(traced.outs.is_empty());
    }
}
