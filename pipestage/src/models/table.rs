//! In-memory tabular data.
//!
//! A [`Table`] is an ordered list of column names plus one JSON object per
//! row. Missing cells and `null` are equivalent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::{DataError, DataResult};
use crate::models::Kwargs;

/// Methods callable on a table by name, without registration.
pub const NATIVE_METHODS: &[&str] = &[
    "rename",
    "fillna",
    "dropna",
    "drop",
    "select",
    "head",
    "tail",
    "drop_duplicates",
    "sort_values",
];

/// Predicates callable on a table by name from a validation step.
pub const NATIVE_PREDICATES: &[&str] = &["isnull", "notnull", "duplicated", "empty"];

/// One row-oriented table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column names in display order
    pub headers: Vec<String>,
    /// One object per row, keyed by column name
    pub rows: Vec<Map<String, Value>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Map<String, Value>>) -> Self {
        Self { headers, rows }
    }

    /// Build a table from JSON records, collecting headers in first-seen order.
    pub fn from_records(records: Vec<Value>) -> DataResult<Self> {
        let mut headers: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            let Value::Object(obj) = record else {
                return Err(DataError::failed("json", format!("record {} is not an object", i)));
            };
            for key in obj.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
            rows.push(obj);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Value of a cell, `Null` when absent.
    pub fn cell<'a>(row: &'a Map<String, Value>, column: &str) -> &'a Value {
        row.get(column).unwrap_or(&Value::Null)
    }

    /// Rows of `self` followed by rows of `other`; headers are unioned.
    pub fn concat(mut self, other: Table) -> Table {
        for header in other.headers {
            if !self.headers.contains(&header) {
                self.headers.push(header);
            }
        }
        self.rows.extend(other.rows);
        self
    }

    /// Keep the rows for which `mask` is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Table {
        let rows = self
            .rows
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(row, _)| row.clone())
            .collect();
        Table::new(self.headers.clone(), rows)
    }

    /// Per-row flag: does the row hold a null in any column?
    pub fn null_mask(&self) -> Vec<bool> {
        self.rows
            .iter()
            .map(|row| self.headers.iter().any(|h| Self::cell(row, h).is_null()))
            .collect()
    }

    fn require_column(&self, column: &str) -> DataResult<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(DataError::MissingColumn(column.to_string()))
        }
    }

    // =========================================================================
    // Native methods
    // =========================================================================

    pub fn has_method(name: &str) -> bool {
        NATIVE_METHODS.contains(&name)
    }

    pub fn has_predicate(name: &str) -> bool {
        NATIVE_PREDICATES.contains(&name)
    }

    /// Invoke a native method with keyword arguments.
    pub fn call_method(&self, name: &str, kwargs: &Kwargs) -> DataResult<Table> {
        match name {
            "rename" => self.rename(&string_map_arg(name, kwargs, "columns")?),
            "fillna" => Ok(self.fillna(kwargs.get("value").cloned().unwrap_or(Value::Null))),
            "dropna" => Ok(self.dropna(optional_list_arg(name, kwargs, "subset")?.as_deref())),
            "drop" => Ok(self.drop(&list_arg(name, kwargs, "columns")?)),
            "select" => self.select(&list_arg(name, kwargs, "columns")?),
            "head" => Ok(self.head(usize_arg(name, kwargs, "n", 5)?)),
            "tail" => Ok(self.tail(usize_arg(name, kwargs, "n", 5)?)),
            "drop_duplicates" => Ok(self.drop_duplicates(
                optional_list_arg(name, kwargs, "subset")?.as_deref(),
            )),
            "sort_values" => {
                let by = list_arg(name, kwargs, "by")?;
                let ascending = kwargs
                    .get("ascending")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                self.sort_values(&by, ascending)
            }
            other => Err(DataError::failed(other, "not a table method")),
        }
    }

    /// Evaluate a native predicate.
    pub fn call_predicate(&self, name: &str) -> DataResult<crate::models::Signal> {
        use crate::models::Signal;
        match name {
            "isnull" => Ok(Signal::Mask(self.null_mask())),
            "notnull" => Ok(Signal::Mask(self.null_mask().into_iter().map(|b| !b).collect())),
            "duplicated" => Ok(Signal::Mask(self.duplicated_mask(None))),
            "empty" => Ok(Signal::Flag(self.is_empty())),
            other => Err(DataError::failed(other, "not a table predicate")),
        }
    }

    pub fn rename(&self, columns: &[(String, String)]) -> DataResult<Table> {
        let lookup = |h: &str| {
            columns
                .iter()
                .find(|(old, _)| old == h)
                .map(|(_, new)| new.clone())
        };
        let headers = self
            .headers
            .iter()
            .map(|h| lookup(h).unwrap_or_else(|| h.clone()))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(k, v)| (lookup(k).unwrap_or_else(|| k.clone()), v.clone()))
                    .collect()
            })
            .collect();
        Ok(Table::new(headers, rows))
    }

    pub fn fillna(&self, value: Value) -> Table {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut filled = row.clone();
                for h in &self.headers {
                    if Self::cell(row, h).is_null() {
                        filled.insert(h.clone(), value.clone());
                    }
                }
                filled
            })
            .collect();
        Table::new(self.headers.clone(), rows)
    }

    pub fn dropna(&self, subset: Option<&[String]>) -> Table {
        let columns = subset.unwrap_or(&self.headers);
        let mask: Vec<bool> = self
            .rows
            .iter()
            .map(|row| columns.iter().all(|c| !Self::cell(row, c).is_null()))
            .collect();
        self.filter_rows(&mask)
    }

    pub fn drop(&self, columns: &[String]) -> Table {
        let headers = self
            .headers
            .iter()
            .filter(|h| !columns.contains(h))
            .cloned()
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                for c in columns {
                    row.remove(c);
                }
                row
            })
            .collect();
        Table::new(headers, rows)
    }

    pub fn select(&self, columns: &[String]) -> DataResult<Table> {
        for c in columns {
            self.require_column(c)?;
        }
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), Self::cell(row, c).clone()))
                    .collect()
            })
            .collect();
        Ok(Table::new(columns.to_vec(), rows))
    }

    pub fn head(&self, n: usize) -> Table {
        Table::new(self.headers.clone(), self.rows.iter().take(n).cloned().collect())
    }

    pub fn tail(&self, n: usize) -> Table {
        let skip = self.rows.len().saturating_sub(n);
        Table::new(self.headers.clone(), self.rows.iter().skip(skip).cloned().collect())
    }

    fn duplicated_mask(&self, subset: Option<&[String]>) -> Vec<bool> {
        let columns = subset.unwrap_or(&self.headers);
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(|row| {
                let key: Vec<String> = columns
                    .iter()
                    .map(|c| Self::cell(row, c).to_string())
                    .collect();
                !seen.insert(key)
            })
            .collect()
    }

    pub fn drop_duplicates(&self, subset: Option<&[String]>) -> Table {
        let mask: Vec<bool> = self
            .duplicated_mask(subset)
            .into_iter()
            .map(|dup| !dup)
            .collect();
        self.filter_rows(&mask)
    }

    pub fn sort_values(&self, by: &[String], ascending: bool) -> DataResult<Table> {
        for c in by {
            self.require_column(c)?;
        }
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let ord = by
                .iter()
                .map(|c| compare_values(Self::cell(a, c), Self::cell(b, c)))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(Table::new(self.headers.clone(), rows))
    }
}

/// Total order over cells: nulls first, then numbers, then everything as text.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

// =============================================================================
// Keyword argument helpers
// =============================================================================

fn invalid(id: &str, message: String) -> DataError {
    DataError::failed(id, message)
}

/// Required string argument.
pub fn str_arg<'a>(id: &str, kwargs: &'a Kwargs, name: &str) -> DataResult<&'a str> {
    kwargs
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(id, format!("missing string argument '{}'", name)))
}

/// Required list argument; a bare string is a one-element list.
pub fn list_arg(id: &str, kwargs: &Kwargs, name: &str) -> DataResult<Vec<String>> {
    optional_list_arg(id, kwargs, name)?
        .ok_or_else(|| invalid(id, format!("missing list argument '{}'", name)))
}

pub fn optional_list_arg(id: &str, kwargs: &Kwargs, name: &str) -> DataResult<Option<Vec<String>>> {
    match kwargs.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(id, format!("'{}' must list strings", name)))
            })
            .collect::<DataResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(invalid(id, format!("'{}' must be a string or a list", name))),
    }
}

pub fn usize_arg(id: &str, kwargs: &Kwargs, name: &str, default: usize) -> DataResult<usize> {
    match kwargs.get(name) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| invalid(id, format!("'{}' must be a non-negative integer", name))),
    }
}

/// Ordered string → string mapping argument.
pub fn string_map_arg(id: &str, kwargs: &Kwargs, name: &str) -> DataResult<Vec<(String, String)>> {
    let Some(Value::Object(map)) = kwargs.get(name) else {
        return Err(invalid(id, format!("missing mapping argument '{}'", name)));
    };
    map.iter()
        .map(|(k, v)| {
            v.as_str()
                .map(|s| (k.clone(), s.to_string()))
                .ok_or_else(|| invalid(id, format!("'{}.{}' must be a string", name, k)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        Table::from_records(vec![
            json!({"id": "a", "value": 3}),
            json!({"id": "b", "value": null}),
            json!({"id": "a", "value": 3}),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_records_collects_headers() {
        let table = Table::from_records(vec![json!({"a": 1}), json!({"b": 2})]).unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_from_records_rejects_scalars() {
        assert!(Table::from_records(vec![json!(1)]).is_err());
    }

    #[test]
    fn test_concat_preserves_order() {
        let left = Table::from_records(vec![json!({"a": 1})]).unwrap();
        let right = Table::from_records(vec![json!({"b": 2})]).unwrap();
        let combined = left.concat(right);
        assert_eq!(combined.headers, vec!["a", "b"]);
        assert_eq!(combined.rows[0]["a"], 1);
        assert_eq!(combined.rows[1]["b"], 2);
    }

    #[test]
    fn test_null_mask() {
        assert_eq!(sample().null_mask(), vec![false, true, false]);
    }

    #[test]
    fn test_rename_method() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("columns".into(), json!({"value": "amount"}));
        let renamed = sample().call_method("rename", &kwargs).unwrap();
        assert_eq!(renamed.headers, vec!["id", "amount"]);
        assert_eq!(renamed.rows[0]["amount"], 3);
    }

    #[test]
    fn test_fillna_and_dropna() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("value".into(), json!(0));
        let filled = sample().call_method("fillna", &kwargs).unwrap();
        assert_eq!(filled.rows[1]["value"], 0);

        let dropped = sample().call_method("dropna", &Kwargs::new()).unwrap();
        assert_eq!(dropped.len(), 2);
    }

    #[test]
    fn test_drop_duplicates() {
        let deduped = sample().call_method("drop_duplicates", &Kwargs::new()).unwrap();
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_sort_values_descending() {
        let table = Table::from_records(vec![json!({"n": 1}), json!({"n": 3}), json!({"n": 2})]).unwrap();
        let mut kwargs = Kwargs::new();
        kwargs.insert("by".into(), json!("n"));
        kwargs.insert("ascending".into(), json!(false));
        let sorted = table.call_method("sort_values", &kwargs).unwrap();
        let values: Vec<_> = sorted.rows.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(values, vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn test_select_missing_column() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("columns".into(), json!(["nope"]));
        let err = sample().call_method("select", &kwargs).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(_)));
    }

    #[test]
    fn test_predicates() {
        use crate::models::Signal;
        assert_eq!(
            sample().call_predicate("duplicated").unwrap(),
            Signal::Mask(vec![false, false, true])
        );
        assert_eq!(Table::default().call_predicate("empty").unwrap(), Signal::Flag(true));
    }
}
