//! Data models flowing through a stage.
//!
//! - [`Container`] - nested data: empty placeholder, one table, a sequence or a keyed mapping
//! - [`Branches`] - insertion-ordered mapping with unique keys
//! - [`Table`] - one tabular leaf
//! - [`Signal`] - what a validation returns before reduction
//! - [`Mode`] - real evaluation or shape-only tracing

use serde_json::{Map, Value};
use std::fmt;

pub mod table;

pub use table::Table;

/// Keyword arguments forwarded to leaf operations, in declaration order.
pub type Kwargs = Map<String, Value>;

// =============================================================================
// Evaluation Mode
// =============================================================================

/// How a stage is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Load, transform and write real data.
    Real,
    /// Propagate empty placeholders to compute output shapes only.
    Trace,
}

impl Mode {
    pub fn is_trace(self) -> bool {
        self == Mode::Trace
    }
}

// =============================================================================
// Validation Signal
// =============================================================================

/// Raw result of a validation leaf, reduced afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A single boolean.
    Flag(bool),
    /// One boolean per row.
    Mask(Vec<bool>),
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Flag(b) => write!(f, "{}", b),
            Signal::Mask(mask) => {
                let shown: Vec<&str> = mask
                    .iter()
                    .take(8)
                    .map(|b| if *b { "true" } else { "false" })
                    .collect();
                let more = if mask.len() > 8 { ", ..." } else { "" };
                write!(f, "[{}{}]", shown.join(", "), more)
            }
        }
    }
}

// =============================================================================
// Branches
// =============================================================================

/// Ordered mapping from key to container. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Branches {
    entries: Vec<(String, Container)>,
}

impl Branches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Container) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Container> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Container> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Container)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Branches {
    type Item = (String, Container);
    type IntoIter = std::vec::IntoIter<(String, Container)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Container)> for Branches {
    fn from_iter<I: IntoIterator<Item = (K, Container)>>(iter: I) -> Self {
        let mut branches = Branches::new();
        for (k, v) in iter {
            branches.insert(k, v);
        }
        branches
    }
}

// =============================================================================
// Container
// =============================================================================

/// Nested data threaded through load, transform, validate and write.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Container {
    /// Placeholder used while tracing.
    #[default]
    Empty,
    /// One table.
    Leaf(Table),
    /// Positional branches.
    Sequence(Vec<Container>),
    /// Named branches.
    Keyed(Branches),
}

impl Container {
    pub fn keyed<K: Into<String>>(entries: impl IntoIterator<Item = (K, Container)>) -> Self {
        Container::Keyed(entries.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Container::Empty)
    }

    /// Short name of the shape, used in messages.
    pub fn shape(&self) -> &'static str {
        match self {
            Container::Empty => "empty",
            Container::Leaf(_) => "tabular",
            Container::Sequence(_) => "sequence",
            Container::Keyed(_) => "keyed",
        }
    }

    /// Number of leaves (tables or placeholders) reachable from here.
    pub fn leaf_count(&self) -> usize {
        match self {
            Container::Empty | Container::Leaf(_) => 1,
            Container::Sequence(items) => items.iter().map(Container::leaf_count).sum(),
            Container::Keyed(branches) => branches.iter().map(|(_, c)| c.leaf_count()).sum(),
        }
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        match self {
            Container::Empty => 0,
            Container::Leaf(table) => table.len(),
            Container::Sequence(items) => items.iter().map(Container::row_count).sum(),
            Container::Keyed(branches) => branches.iter().map(|(_, c)| c.row_count()).sum(),
        }
    }
}

impl From<Table> for Container {
    fn from(table: Table) -> Self {
        Container::Leaf(table)
    }
}

impl From<Option<Table>> for Container {
    fn from(table: Option<Table>) -> Self {
        table.map(Container::Leaf).unwrap_or(Container::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(v: i64) -> Container {
        Table::from_records(vec![json!({"v": v})]).unwrap().into()
    }

    #[test]
    fn test_branches_keep_insertion_order() {
        let branches: Branches = vec![("c", leaf(3)), ("a", leaf(1)), ("b", leaf(2))]
            .into_iter()
            .collect();
        let keys: Vec<_> = branches.keys().collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_branches_replace_in_place() {
        let mut branches = Branches::new();
        branches.insert("a", leaf(1));
        branches.insert("b", leaf(2));
        branches.insert("a", Container::Empty);
        let keys: Vec<_> = branches.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(branches.get("a"), Some(&Container::Empty));
    }

    #[test]
    fn test_leaf_count() {
        let data = Container::keyed(vec![
            ("x", leaf(1)),
            ("y", Container::Sequence(vec![leaf(2), Container::Empty])),
        ]);
        assert_eq!(data.leaf_count(), 3);
        assert_eq!(data.row_count(), 2);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Flag(true).to_string(), "true");
        assert_eq!(Signal::Mask(vec![true, false]).to_string(), "[true, false]");
    }
}
