//! Container walker.
//!
//! Applies one step to every leaf of a nested container. Keyed and
//! sequence branches are filtered by the step's include/exclude patterns;
//! skipped branches pass through untouched.

use regex::Regex;
use std::borrow::Cow;

use super::combine;
use crate::config::Step;
use crate::error::{ConfigError, ConfigResult, StageError, StageResult};
use crate::models::{Branches, Container, Kwargs, Mode, Table};
use crate::registry::{Operation, Registry, Transform, TransformFn, Validate, ValidateFn};
use crate::validation::matches_expected;

/// Operation id handled structurally instead of through the registry.
pub const COMBINE: &str = "combine";

// =============================================================================
// Key filter
// =============================================================================

/// Compiled include/exclude patterns. Patterns must match the whole key.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

fn alternation(patterns: &[String]) -> ConfigResult<Option<Regex>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let joined = patterns.join("|");
    Regex::new(&format!("^(?:{})$", joined))
        .map(Some)
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: joined,
            message: e.to_string(),
        })
}

impl KeyFilter {
    pub fn new(include: &[String], exclude: &[String]) -> ConfigResult<Self> {
        Ok(Self {
            include: alternation(include)?,
            exclude: alternation(exclude)?,
        })
    }

    pub fn for_step(step: &Step) -> ConfigResult<Self> {
        Self::new(&step.include, &step.exclude)
    }

    /// A key is skipped when excluded, or when an include list exists and
    /// the key is not on it.
    pub fn is_skipped(&self, key: &str) -> bool {
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(key));
        let skipped = excluded || self.include.as_ref().is_some_and(|re| !re.is_match(key));
        tracing::debug!("key \"{}\" is {}skipped", key, if skipped { "" } else { "not " });
        skipped
    }
}

/// One-off check without keeping the compiled filter.
pub fn key_is_skipped(key: &str, include: &[String], exclude: &[String]) -> ConfigResult<bool> {
    Ok(KeyFilter::new(include, exclude)?.is_skipped(key))
}

// =============================================================================
// Walker
// =============================================================================

/// Walks containers for one registry and evaluation mode.
pub struct Walker<'r> {
    registry: &'r Registry,
    mode: Mode,
}

struct TransformStep<'s> {
    step: &'s Step,
    filter: KeyFilter,
    operation: Option<Operation<TransformFn>>,
}

/// Insert a branch that must not exist yet. Expanded branches are spliced
/// into their parent, so their keys can meet siblings.
fn put(out: &mut Branches, key: String, value: Container) -> StageResult<()> {
    if out.contains_key(&key) {
        return Err(ConfigError::DuplicateKey(key).into());
    }
    out.insert(key, value);
    Ok(())
}

impl<'r> Walker<'r> {
    pub fn new(registry: &'r Registry, mode: Mode) -> Self {
        Self { registry, mode }
    }

    /// Apply a transformation step.
    pub fn transform(&self, data: Container, step: &Step) -> StageResult<Container> {
        let operation = if step.id == COMBINE {
            None
        } else {
            Some(self.registry.resolve::<Transform>(&step.id, step.import_from.as_deref())?)
        };
        let ctx = TransformStep {
            step,
            filter: KeyFilter::for_step(step)?,
            operation,
        };
        self.apply(data, &ctx, Cow::Borrowed(&step.kwargs))
    }

    fn apply(&self, data: Container, ctx: &TransformStep<'_>, kwargs: Cow<'_, Kwargs>) -> StageResult<Container> {
        match (data, &ctx.operation) {
            (Container::Keyed(branches), None) => {
                combine::combine_keyed(branches, &ctx.filter, new_key(&kwargs), self.mode)
            }
            (Container::Sequence(items), None) => {
                combine::combine_sequence(items, &ctx.filter, new_key(&kwargs), self.mode)
            }
            // nothing to combine below a leaf
            (leaf, None) => Ok(leaf),

            (Container::Keyed(branches), Some(_)) => {
                let mut out = Branches::new();
                for (key, branch) in branches {
                    if ctx.filter.is_skipped(&key) {
                        put(&mut out, key, branch)?;
                        continue;
                    }
                    let kwargs = if ctx.step.pass_key_to_fn {
                        let mut with_key = kwargs.clone().into_owned();
                        with_key.insert("key".to_string(), key.clone().into());
                        Cow::Owned(with_key)
                    } else {
                        Cow::Borrowed(&*kwargs)
                    };
                    match self.apply(branch, ctx, kwargs)? {
                        Container::Keyed(expanded) => {
                            tracing::debug!("'{}' expanded into {} keys", key, expanded.len());
                            for (k, v) in expanded {
                                put(&mut out, k, v)?;
                            }
                        }
                        other => put(&mut out, key, other)?,
                    }
                }
                Ok(Container::Keyed(out))
            }
            (Container::Sequence(items), Some(_)) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    if ctx.filter.is_skipped(&i.to_string()) {
                        Ok(item)
                    } else {
                        self.apply(item, ctx, Cow::Borrowed(&*kwargs))
                    }
                })
                .collect::<StageResult<Vec<_>>>()
                .map(Container::Sequence),
            (Container::Leaf(table), Some(op)) => Ok(op.call(Some(table), &kwargs)?),
            (Container::Empty, Some(op)) => Ok(op.call(None, &kwargs)?),
        }
    }

    /// Run a validation step over every non-empty leaf.
    pub fn validate(&self, data: &Container, step: &Step) -> StageResult<()> {
        let operation = self
            .registry
            .resolve::<Validate>(&step.id, step.import_from.as_deref())?;
        let filter = KeyFilter::for_step(step)?;
        let mut path = Vec::new();
        self.check(data, step, &filter, &operation, Cow::Borrowed(&step.kwargs), &mut path)
    }

    fn check(
        &self,
        data: &Container,
        step: &Step,
        filter: &KeyFilter,
        operation: &Operation<ValidateFn>,
        kwargs: Cow<'_, Kwargs>,
        path: &mut Vec<String>,
    ) -> StageResult<()> {
        match data {
            Container::Keyed(branches) => {
                for (key, branch) in branches.iter() {
                    if filter.is_skipped(key) {
                        continue;
                    }
                    let kwargs = if step.pass_key_to_fn {
                        let mut with_key = kwargs.clone().into_owned();
                        with_key.insert("key".to_string(), key.into());
                        Cow::Owned(with_key)
                    } else {
                        Cow::Borrowed(&*kwargs)
                    };
                    path.push(key.to_string());
                    self.check(branch, step, filter, operation, kwargs, path)?;
                    path.pop();
                }
                Ok(())
            }
            Container::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let index = i.to_string();
                    if filter.is_skipped(&index) {
                        continue;
                    }
                    path.push(index);
                    self.check(item, step, filter, operation, Cow::Borrowed(&*kwargs), path)?;
                    path.pop();
                }
                Ok(())
            }
            Container::Leaf(table) => self.check_leaf(table, step, operation, &kwargs, path),
            Container::Empty => Ok(()),
        }
    }

    fn check_leaf(
        &self,
        table: &Table,
        step: &Step,
        operation: &Operation<ValidateFn>,
        kwargs: &Kwargs,
        path: &[String],
    ) -> StageResult<()> {
        let signal = operation.call(table, kwargs)?;
        let reduced = step.reduction.reduce(signal);
        if matches_expected(&reduced, step.expected) {
            return Ok(());
        }
        let key_path = if path.is_empty() {
            "<root>".to_string()
        } else {
            path.join(".")
        };
        Err(StageError::ValidationFailed {
            id: step.id.clone(),
            key_path,
            reduction: step.reduction,
            actual: reduced.to_string(),
            expected: step.expected,
        })
    }
}

fn new_key(kwargs: &Kwargs) -> &str {
    kwargs
        .get("new_key")
        .and_then(|v| v.as_str())
        .unwrap_or(combine::DEFAULT_NEW_KEY)
}
