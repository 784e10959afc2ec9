//! The structural `combine` step.
//!
//! Concatenates the selected branches of a keyed or sequence container into
//! one table. Keyed branches are taken in sorted key order, sequence items
//! in index order.

use super::walker::KeyFilter;
use crate::error::{StageError, StageResult};
use crate::models::{Branches, Container, Mode, Table};

/// Key of the combined table when `new_key` is not given.
pub const DEFAULT_NEW_KEY: &str = "combined";

/// Tables reachable from `container` in walk order. Returns `false` when a
/// placeholder was found.
fn collect_tables(container: Container, out: &mut Vec<Table>) -> bool {
    match container {
        Container::Empty => false,
        Container::Leaf(table) => {
            out.push(table);
            true
        }
        Container::Sequence(items) => items
            .into_iter()
            .fold(true, |complete, item| collect_tables(item, out) && complete),
        Container::Keyed(branches) => branches
            .into_iter()
            .fold(true, |complete, (_, branch)| collect_tables(branch, out) && complete),
    }
}

fn concat(parts: Vec<Container>, new_key: &str, mode: Mode) -> StageResult<Container> {
    let mut tables = Vec::new();
    let mut complete = true;
    for part in parts {
        complete &= collect_tables(part, &mut tables);
    }

    if mode.is_trace() && !complete {
        tracing::debug!("tracing combine into '{}'", new_key);
        return Ok(Container::Empty);
    }

    let mut tables = tables.into_iter();
    let first = tables.next().ok_or_else(|| StageError::EmptyCombine {
        new_key: new_key.to_string(),
    })?;
    let combined = tables.fold(first, Table::concat);
    tracing::debug!("combined {} rows into '{}'", combined.len(), new_key);
    Ok(Container::Leaf(combined))
}

/// Combine the non-skipped branches of a keyed container.
///
/// The result stays keyed, with the combined table under `new_key`, when
/// skipped branches remain; otherwise it collapses to the combined table.
pub fn combine_keyed(mut branches: Branches, filter: &KeyFilter, new_key: &str, mode: Mode) -> StageResult<Container> {
    let mut selected: Vec<String> = branches
        .keys()
        .filter(|k| !filter.is_skipped(k))
        .map(str::to_string)
        .collect();
    selected.sort();
    if selected.is_empty() {
        return Err(StageError::EmptyCombine {
            new_key: new_key.to_string(),
        });
    }

    let parts: Vec<Container> = selected
        .iter()
        .filter_map(|key| branches.remove(key))
        .collect();
    let combined = concat(parts, new_key, mode)?;

    if branches.is_empty() {
        Ok(combined)
    } else {
        branches.insert(new_key, combined);
        Ok(Container::Keyed(branches))
    }
}

/// Combine the non-skipped items of a sequence.
///
/// Skipped items stay in place and the combined table is appended after
/// them; with nothing skipped the result is the combined table.
pub fn combine_sequence(items: Vec<Container>, filter: &KeyFilter, new_key: &str, mode: Mode) -> StageResult<Container> {
    let (parts, rest): (Vec<_>, Vec<_>) = items
        .into_iter()
        .enumerate()
        .partition(|(i, _)| !filter.is_skipped(&i.to_string()));
    if parts.is_empty() {
        return Err(StageError::EmptyCombine {
            new_key: new_key.to_string(),
        });
    }

    let combined = concat(parts.into_iter().map(|(_, c)| c).collect(), new_key, mode)?;
    if rest.is_empty() {
        Ok(combined)
    } else {
        let mut items: Vec<Container> = rest.into_iter().map(|(_, c)| c).collect();
        items.push(combined);
        Ok(Container::Sequence(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn leaf(v: i64) -> Container {
        Table::from_records(vec![json!({"v": v})]).unwrap().into()
    }

    fn values(c: &Container) -> Vec<i64> {
        match c {
            Container::Leaf(t) => t.rows.iter().map(|r| r["v"].as_i64().unwrap()).collect(),
            other => panic!("expected a table, got {}", other.shape()),
        }
    }

    fn no_filter() -> KeyFilter {
        KeyFilter::default()
    }

    #[test]
    fn test_combine_order_is_key_order() {
        let forward: Branches = vec![("a", leaf(1)), ("b", leaf(2)), ("c", leaf(3))].into_iter().collect();
        let backward: Branches = vec![("c", leaf(3)), ("b", leaf(2)), ("a", leaf(1))].into_iter().collect();

        let one = combine_keyed(forward, &no_filter(), "all", Mode::Real).unwrap();
        let two = combine_keyed(backward, &no_filter(), "all", Mode::Real).unwrap();
        assert_eq!(values(&one), vec![1, 2, 3]);
        assert_eq!(one, two);
    }

    #[test]
    fn test_combine_keeps_skipped_keys() {
        let branches: Branches = vec![("train", leaf(1)), ("val", leaf(2)), ("test", leaf(3))]
            .into_iter()
            .collect();
        let filter = KeyFilter::new(&[], &["test".to_string()]).unwrap();
        let result = combine_keyed(branches, &filter, "fit", Mode::Real).unwrap();

        let Container::Keyed(b) = result else {
            panic!("expected keyed result")
        };
        assert_eq!(b.keys().collect::<Vec<_>>(), vec!["test", "fit"]);
        assert_eq!(values(b.get("fit").unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_combine_trace_yields_placeholder() {
        let branches: Branches = vec![("a", Container::Empty), ("b", Container::Empty)]
            .into_iter()
            .collect();
        let result = combine_keyed(branches, &no_filter(), DEFAULT_NEW_KEY, Mode::Trace).unwrap();
        assert_eq!(result, Container::Empty);
    }

    #[test]
    fn test_combine_real_with_only_placeholders_fails() {
        let branches: Branches = vec![("a", Container::Empty)].into_iter().collect();
        let err = combine_keyed(branches, &no_filter(), DEFAULT_NEW_KEY, Mode::Real).unwrap_err();
        assert!(matches!(err, StageError::EmptyCombine { .. }));
    }

    #[test]
    fn test_combine_nothing_selected_fails() {
        let branches: Branches = vec![("a", leaf(1))].into_iter().collect();
        let filter = KeyFilter::new(&["b".to_string()], &[]).unwrap();
        let err = combine_keyed(branches, &filter, DEFAULT_NEW_KEY, Mode::Trace).unwrap_err();
        assert!(matches!(err, StageError::EmptyCombine { .. }));
    }

    #[test]
    fn test_combine_sequence() {
        let items = vec![leaf(1), leaf(2), leaf(3)];
        let filter = KeyFilter::new(&[], &["0".to_string()]).unwrap();
        let result = combine_sequence(items, &filter, DEFAULT_NEW_KEY, Mode::Real).unwrap();
        let Container::Sequence(items) = result else {
            panic!("expected sequence")
        };
        assert_eq!(values(&items[0]), vec![1]);
        assert_eq!(values(&items[1]), vec![2, 3]);

        let all = combine_sequence(vec![leaf(1), leaf(2)], &no_filter(), DEFAULT_NEW_KEY, Mode::Real).unwrap();
        assert_eq!(values(&all), vec![1, 2]);
    }
}
