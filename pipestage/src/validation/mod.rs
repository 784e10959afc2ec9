//! Validation functions and signal reduction.
//!
//! A validation leaf returns a [`Signal`] (one flag, or one flag per row).
//! The step's [`Reduction`] collapses it, and the result must equal the
//! step's `expected` value.
//!
//! # Builtin validations
//!
//! - `no_nans` - per-row mask, true where the row holds a null
//! - `schema` - per-row mask, true where the row violates a JSON Schema (draft 7)
//! - `columns` - flag, true when every listed column exists
//!
//! # Example
//!
//! ```yaml
//! validations:
//!   - id: no_nans
//!     reduction: any
//!     expected: false
//!   - id: schema
//!     schema: {type: object, required: [id]}
//!     reduction: any
//!     expected: false
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{DataError, DataResult};
use crate::models::table::{list_arg, str_arg};
use crate::models::{Kwargs, Signal, Table};

// =============================================================================
// Reduction
// =============================================================================

/// How a validation signal is collapsed before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// True if any element is true.
    #[default]
    Any,
    /// True if every element is true.
    All,
    /// No reduction; every element must equal the expectation.
    None,
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reduction::Any => "any",
            Reduction::All => "all",
            Reduction::None => "none",
        };
        f.write_str(name)
    }
}

impl Reduction {
    /// Collapse a signal. `None` is the identity.
    pub fn reduce(self, signal: Signal) -> Signal {
        match (self, signal) {
            (Reduction::Any, Signal::Mask(mask)) => Signal::Flag(mask.iter().any(|b| *b)),
            (Reduction::All, Signal::Mask(mask)) => Signal::Flag(mask.iter().all(|b| *b)),
            (_, signal) => signal,
        }
    }
}

/// Does a reduced signal equal the expectation?
pub fn matches_expected(reduced: &Signal, expected: bool) -> bool {
    match reduced {
        Signal::Flag(b) => *b == expected,
        Signal::Mask(mask) => mask.iter().all(|b| *b == expected),
    }
}

// =============================================================================
// Builtin validations
// =============================================================================

/// Per-row null mask.
pub fn no_nans(data: &Table, _kwargs: &Kwargs) -> DataResult<Signal> {
    Ok(Signal::Mask(data.null_mask()))
}

/// Per-row schema violation mask.
///
/// The schema comes inline (`schema`) or from a JSON file (`schema_path`).
pub fn schema(data: &Table, kwargs: &Kwargs) -> DataResult<Signal> {
    let schema = match kwargs.get("schema") {
        Some(schema) => schema.clone(),
        None => {
            let path = str_arg("schema", kwargs, "schema_path")?;
            let content =
                std::fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
            serde_json::from_str(&content)?
        }
    };
    let validator =
        jsonschema::draft7::new(&schema).map_err(|e| DataError::Schema(e.to_string()))?;

    let mask = data
        .rows
        .iter()
        .map(|row| {
            let record = Value::Object(row.clone());
            let valid = validator.is_valid(&record);
            if !valid {
                for error in validator.iter_errors(&record).take(3) {
                    tracing::debug!("schema violation: {}", error);
                }
            }
            !valid
        })
        .collect();
    Ok(Signal::Mask(mask))
}

/// True when every listed column exists.
pub fn columns(data: &Table, kwargs: &Kwargs) -> DataResult<Signal> {
    let required = list_arg("columns", kwargs, "columns")?;
    let missing: Vec<&String> = required.iter().filter(|c| !data.has_column(c)).collect();
    if !missing.is_empty() {
        tracing::debug!("missing columns: {:?}", missing);
    }
    Ok(Signal::Flag(missing.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        Table::from_records(vec![
            json!({"id": "a", "value": 1}),
            json!({"id": "b", "value": null}),
        ])
        .unwrap()
    }

    #[test]
    fn test_reductions() {
        let mask = Signal::Mask(vec![false, true]);
        assert_eq!(Reduction::Any.reduce(mask.clone()), Signal::Flag(true));
        assert_eq!(Reduction::All.reduce(mask.clone()), Signal::Flag(false));
        assert_eq!(Reduction::None.reduce(mask.clone()), mask);
    }

    #[test]
    fn test_empty_mask_reductions() {
        assert_eq!(Reduction::Any.reduce(Signal::Mask(vec![])), Signal::Flag(false));
        assert_eq!(Reduction::All.reduce(Signal::Mask(vec![])), Signal::Flag(true));
    }

    #[test]
    fn test_matches_expected() {
        assert!(matches_expected(&Signal::Flag(false), false));
        assert!(!matches_expected(&Signal::Flag(true), false));
        assert!(matches_expected(&Signal::Mask(vec![true, true]), true));
        assert!(!matches_expected(&Signal::Mask(vec![true, false]), true));
    }

    #[test]
    fn test_reduction_serde() {
        let r: Reduction = serde_yaml::from_str("all").unwrap();
        assert_eq!(r, Reduction::All);
        assert_eq!(Reduction::None.to_string(), "none");
    }

    #[test]
    fn test_no_nans_mask() {
        let signal = no_nans(&table(), &Kwargs::new()).unwrap();
        assert_eq!(signal, Signal::Mask(vec![false, true]));
    }

    #[test]
    fn test_schema_mask() {
        let mut kwargs = Kwargs::new();
        kwargs.insert(
            "schema".into(),
            json!({
                "type": "object",
                "required": ["id", "value"],
                "properties": { "value": { "type": "integer" } }
            }),
        );
        let signal = schema(&table(), &kwargs).unwrap();
        assert_eq!(signal, Signal::Mask(vec![false, true]));
    }

    #[test]
    fn test_schema_requires_argument() {
        assert!(schema(&table(), &Kwargs::new()).is_err());
    }

    #[test]
    fn test_columns_flag() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("columns".into(), json!(["id", "value"]));
        assert_eq!(columns(&table(), &kwargs).unwrap(), Signal::Flag(true));

        kwargs.insert("columns".into(), json!(["id", "label"]));
        assert_eq!(columns(&table(), &kwargs).unwrap(), Signal::Flag(false));
    }
}
