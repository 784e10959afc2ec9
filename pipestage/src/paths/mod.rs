//! Path placeholders, dependency globs and output fan-out.
//!
//! Two kinds of placeholders appear in configured paths:
//!
//! - `${name}` - a global parameter from the params file
//! - `{key}` / `{item}` (or `${key}` / `${item}`) - filled per branch when
//!   writing keyed or sequence data
//!
//! `${item}` in a dependency path is kept literally when no item is given,
//! so foreach-style stages can declare a templated dependency.

use globset::GlobBuilder;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Params;
use crate::error::{ConfigError, ConfigResult, StageError, StageResult};
use crate::models::{Container, Kwargs, Table};

static PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("valid placeholder regex"));

static SLOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("valid slot regex"));

const KEY_SLOT: &str = "key";
const ITEM_SLOT: &str = "item";

/// Replace every match of `re` in `template`. `lookup` returns the value
/// for a placeholder name, or `None` to keep the placeholder as written.
fn substitute<F>(re: &Regex, template: &str, mut lookup: F) -> ConfigResult<String>
where
    F: FnMut(&str) -> ConfigResult<Option<String>>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        match lookup(name.as_str())? {
            Some(value) => out.push_str(&value),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn placeholder_names(re: &Regex, template: &str) -> BTreeSet<String> {
    re.captures_iter(template)
        .filter_map(|c: Captures| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

// =============================================================================
// Parameter placeholders
// =============================================================================

/// Substitute `${name}` placeholders from global parameters.
///
/// Returns the substituted path and every placeholder name it referenced.
pub fn parse_path(path: &str, params: &Params, item: Option<&str>) -> ConfigResult<(String, BTreeSet<String>)> {
    let names = placeholder_names(&PARAM, path);
    let parsed = substitute(&PARAM, path, |name| {
        if name == ITEM_SLOT {
            if let Some(item) = item {
                return Ok(Some(item.to_string()));
            }
            if params.scalar(name).is_none() {
                return Ok(None);
            }
        }
        params
            .scalar(name)
            .map(Some)
            .ok_or_else(|| ConfigError::MissingPlaceholder {
                name: name.to_string(),
                path: path.to_string(),
            })
    })?;
    Ok((parsed, names))
}

// =============================================================================
// Dependencies
// =============================================================================

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Files and directories matching a glob, sorted. A pattern without glob
/// characters matches itself if it exists.
pub fn expand_glob(pattern: &str) -> ConfigResult<Vec<String>> {
    if !has_glob_meta(pattern) {
        return Ok(if Path::new(pattern).exists() {
            vec![pattern.to_string()]
        } else {
            Vec::new()
        });
    }

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?
        .compile_matcher();

    // walk from the longest literal prefix
    let mut base = PathBuf::new();
    let mut rest = 0;
    let mut recursive = false;
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if rest == 0 && !has_glob_meta(&text) {
            base.push(component);
        } else {
            rest += 1;
            recursive |= text.contains("**");
        }
    }
    let relative = base.as_os_str().is_empty();
    let root = if relative { PathBuf::from(".") } else { base };

    let mut walker = WalkDir::new(&root).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(rest);
    }

    let mut found = Vec::new();
    for entry in walker.into_iter().filter_map(Result::ok) {
        let path = entry.path();
        let path = if relative {
            path.strip_prefix(".").unwrap_or(path)
        } else {
            path
        };
        if matcher.is_match(path) {
            found.push(path.to_string_lossy().into_owned());
        }
    }
    found.sort();
    Ok(found)
}

/// Resolve dependency patterns to existing paths.
///
/// Returns the sorted, de-duplicated dependency list and the parameter
/// names the patterns referenced. Every pattern must match at least once.
pub fn get_deps(patterns: &[&str], params: &Params, item: Option<&str>) -> StageResult<(Vec<String>, BTreeSet<String>)> {
    let mut deps = BTreeSet::new();
    let mut param_keys = BTreeSet::new();

    for pattern in patterns {
        let (path, mut names) = parse_path(pattern, params, item)?;
        let matched = if names.contains(ITEM_SLOT) && item.is_none() {
            names.remove(ITEM_SLOT);
            vec![path.clone()]
        } else {
            expand_glob(&path)?
        };
        if matched.is_empty() {
            return Err(StageError::DependencyNotFound { pattern: path });
        }
        tracing::debug!("'{}' matched {} path(s)", pattern, matched.len());
        deps.extend(matched);
        param_keys.extend(names);
    }

    Ok((deps.into_iter().collect(), param_keys))
}

/// Branch key of a loaded file: its stem, rewritten by the ordered
/// `key_map` regex → replacement rules.
pub fn file_key(path: &str, key_map: &Kwargs) -> ConfigResult<String> {
    let mut key = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    for (pattern, replacement) in key_map {
        let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        let replacement = replacement.as_str().ok_or_else(|| ConfigError::InvalidArgument {
            id: "key_map".to_string(),
            message: format!("replacement for '{}' must be a string", pattern),
        })?;
        key = re.replace_all(&key, replacement).into_owned();
    }
    Ok(key)
}

// =============================================================================
// Outputs
// =============================================================================

/// One file a write produces. `table` is `None` for traced placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Output<'a> {
    pub path: String,
    pub table: Option<&'a Table>,
}

fn has_slot(template: &str, slot: &str) -> bool {
    placeholder_names(&SLOT, template).contains(slot)
}

/// Branch values bound while descending into the data.
#[derive(Debug, Clone, Copy, Default)]
struct Slots<'d> {
    key: Option<&'d str>,
    item: Option<usize>,
}

/// Fill every placeholder of `template` in one pass.
fn finish(template: &str, slots: Slots<'_>, params: &Params) -> ConfigResult<String> {
    if SLOT.replace_all(template, "").contains(['{', '}']) {
        return Err(ConfigError::MalformedTemplate {
            path: template.to_string(),
            message: "unbalanced braces".to_string(),
        });
    }
    substitute(&SLOT, template, |name| {
        let value = match name {
            KEY_SLOT => slots.key.map(str::to_string),
            ITEM_SLOT => slots.item.map(|i| i.to_string()),
            _ => params.scalar(name),
        };
        value.map(Some).ok_or_else(|| ConfigError::MissingPlaceholder {
            name: name.to_string(),
            path: template.to_string(),
        })
    })
}

fn plan<'a>(
    data: &'a Container,
    template: &str,
    slots: Slots<'a>,
    params: &Params,
    out: &mut Vec<Output<'a>>,
) -> ConfigResult<()> {
    match data {
        Container::Keyed(branches) => {
            if slots.key.is_some() || !has_slot(template, KEY_SLOT) {
                return Err(ConfigError::MissingSlot {
                    path: template.to_string(),
                    slot: KEY_SLOT,
                    shape: data.shape(),
                });
            }
            for (key, branch) in branches.iter() {
                plan(branch, template, Slots { key: Some(key), ..slots }, params, out)?;
            }
        }
        Container::Sequence(items) => {
            if slots.item.is_some() || !has_slot(template, ITEM_SLOT) {
                return Err(ConfigError::MissingSlot {
                    path: template.to_string(),
                    slot: ITEM_SLOT,
                    shape: data.shape(),
                });
            }
            for (i, item) in items.iter().enumerate() {
                plan(item, template, Slots { item: Some(i), ..slots }, params, out)?;
            }
        }
        Container::Leaf(table) => out.push(Output {
            path: finish(template, slots, params)?,
            table: Some(table),
        }),
        Container::Empty => out.push(Output {
            path: finish(template, slots, params)?,
            table: None,
        }),
    }
    Ok(())
}

/// Every file a write of `data` through `template` produces, in data order.
///
/// Fails when the template cannot fan out over the data, a placeholder has
/// no value, or two branches land on the same path.
pub fn plan_outputs<'a>(data: &'a Container, template: &str, params: &Params) -> ConfigResult<Vec<Output<'a>>> {
    let mut outputs = Vec::new();
    plan(data, template, Slots::default(), params, &mut outputs)?;

    let mut seen = HashSet::new();
    for output in &outputs {
        if !seen.insert(output.path.as_str()) {
            return Err(ConfigError::DuplicateOutput(output.path.clone()));
        }
    }
    Ok(outputs)
}

/// Sorted output paths of a write.
pub fn get_outs(data: &Container, template: &str, params: &Params) -> ConfigResult<Vec<String>> {
    let mut outs: Vec<String> = plan_outputs(data, template, params)?
        .into_iter()
        .map(|o| o.path)
        .collect();
    outs.sort();
    Ok(outs)
}
