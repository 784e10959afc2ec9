//! Cell operations used by the `map_column` transformation.
//!
//! Operations are declared as a list of tagged objects and applied left to
//! right to every cell of one column:
//!
//! ```yaml
//! - id: map_column
//!   column: isrc
//!   operations:
//!     - {type: trim}
//!     - {type: replace, pattern: "[-. ]", value: ""}
//!     - {type: uppercase}
//! ```
//!
//! Null cells stay null, except for `map` with a default.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

use crate::error::{DataError, DataResult};

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("valid year regex"));

/// One cell operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellOp {
    Trim,
    Uppercase,
    Lowercase,

    /// Regex replacement over the whole cell
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },

    PadStart {
        length: usize,
        #[serde(default = "default_pad")]
        fill: char,
    },

    PadEnd {
        length: usize,
        #[serde(default = "default_pad")]
        fill: char,
    },

    /// First run of four digits, as an integer
    ExtractYear,

    EnsurePrefix { value: String },

    EnsureSuffix { value: String },

    /// Lookup table; unmapped cells become `default` (null when unset)
    Map {
        mapping: BTreeMap<String, Value>,
        #[serde(default)]
        case_insensitive: bool,
        #[serde(default)]
        default: Option<Value>,
    },

    /// Parse as integer, then float; unparsable cells become null
    ToNumber,

    /// Characters `[start, start + length)`
    Substring {
        start: usize,
        #[serde(default)]
        length: Option<usize>,
    },

    DigitsOnly,
}

fn default_pad() -> char {
    '0'
}

/// An operation ready to apply, with its regex compiled once.
#[derive(Debug, Clone)]
pub struct Compiled {
    op: CellOp,
    regex: Option<Regex>,
}

impl CellOp {
    pub fn compile(self) -> DataResult<Compiled> {
        let regex = match &self {
            CellOp::Replace { pattern, .. } => Some(
                Regex::new(pattern)
                    .map_err(|e| DataError::failed("map_column", format!("bad pattern '{}': {}", pattern, e)))?,
            ),
            _ => None,
        };
        Ok(Compiled { op: self, regex })
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn pad(s: String, length: usize, fill: char, at_start: bool) -> String {
    let count = s.chars().count();
    if count >= length {
        return s;
    }
    let padding: String = std::iter::repeat(fill).take(length - count).collect();
    if at_start {
        padding + &s
    } else {
        s + &padding
    }
}

impl Compiled {
    pub fn apply(&self, value: &Value) -> Value {
        // map is the only operation that gives nulls a value
        if let CellOp::Map {
            mapping,
            case_insensitive,
            default,
        } = &self.op
        {
            let fallback = default.clone().unwrap_or(Value::Null);
            let Some(s) = text(value) else {
                return fallback;
            };
            let found = if *case_insensitive {
                let lower = s.to_lowercase();
                mapping
                    .iter()
                    .find(|(k, _)| k.to_lowercase() == lower)
                    .map(|(_, v)| v)
            } else {
                mapping.get(&s)
            };
            return found.cloned().unwrap_or(fallback);
        }

        let Some(s) = text(value) else {
            return value.clone();
        };
        match &self.op {
            CellOp::Trim => Value::String(s.trim().to_string()),
            CellOp::Uppercase => Value::String(s.to_uppercase()),
            CellOp::Lowercase => Value::String(s.to_lowercase()),
            CellOp::Replace { value: with, .. } => match &self.regex {
                Some(re) => Value::String(re.replace_all(&s, with.as_str()).into_owned()),
                None => Value::String(s),
            },
            CellOp::PadStart { length, fill } => Value::String(pad(s, *length, *fill, true)),
            CellOp::PadEnd { length, fill } => Value::String(pad(s, *length, *fill, false)),
            CellOp::ExtractYear => YEAR
                .find(&s)
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .map(Value::from)
                .unwrap_or(Value::Null),
            CellOp::EnsurePrefix { value: prefix } if !s.starts_with(prefix.as_str()) => {
                Value::String(format!("{}{}", prefix, s))
            }
            CellOp::EnsureSuffix { value: suffix } if !s.ends_with(suffix.as_str()) => {
                Value::String(format!("{}{}", s, suffix))
            }
            CellOp::EnsurePrefix { .. } | CellOp::EnsureSuffix { .. } => Value::String(s),
            CellOp::ToNumber => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Value::from(i)
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            CellOp::Substring { start, length } => {
                let chars = s.chars().skip(*start);
                let taken: String = match length {
                    Some(n) => chars.take(*n).collect(),
                    None => chars.collect(),
                };
                Value::String(taken)
            }
            CellOp::DigitsOnly => Value::String(s.chars().filter(char::is_ascii_digit).collect()),
            CellOp::Map { .. } => value.clone(),
        }
    }
}

/// Apply a chain of operations.
pub fn apply_all(ops: &[Compiled], value: &Value) -> Value {
    ops.iter().fold(value.clone(), |v, op| op.apply(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(value: Value) -> Compiled {
        serde_json::from_value::<CellOp>(value).unwrap().compile().unwrap()
    }

    #[test]
    fn test_trim_and_case() {
        let ops = vec![op(json!({"type": "trim"})), op(json!({"type": "uppercase"}))];
        assert_eq!(apply_all(&ops, &json!("  fr  ")), json!("FR"));
    }

    #[test]
    fn test_replace() {
        let replace = op(json!({"type": "replace", "pattern": "[-. ]", "value": ""}));
        assert_eq!(replace.apply(&json!("FR-Z03.14 00")), json!("FRZ031400"));
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let parsed: CellOp = serde_json::from_value(json!({"type": "replace", "pattern": "("})).unwrap();
        assert!(parsed.compile().is_err());
    }

    #[test]
    fn test_map_with_default() {
        let map = op(json!({
            "type": "map",
            "mapping": {"CA": "Composer", "A": "Author"},
            "case_insensitive": true,
            "default": "Other"
        }));
        assert_eq!(map.apply(&json!("ca")), json!("Composer"));
        assert_eq!(map.apply(&json!("xyz")), json!("Other"));
        assert_eq!(map.apply(&Value::Null), json!("Other"));
    }

    #[test]
    fn test_to_number() {
        let to_number = op(json!({"type": "to_number"}));
        assert_eq!(to_number.apply(&json!("42")), json!(42));
        assert_eq!(to_number.apply(&json!("2.5")), json!(2.5));
        assert_eq!(to_number.apply(&json!("n/a")), Value::Null);
    }

    #[test]
    fn test_extract_year() {
        let year = op(json!({"type": "extract_year"}));
        assert_eq!(year.apply(&json!("15/03/2024")), json!(2024));
        assert_eq!(year.apply(&json!("no date")), Value::Null);
    }

    #[test]
    fn test_pad_and_prefix() {
        let ops = vec![
            op(json!({"type": "pad_start", "length": 5})),
            op(json!({"type": "ensure_prefix", "value": "T"})),
        ];
        assert_eq!(apply_all(&ops, &json!(42)), json!("T00042"));
        assert_eq!(apply_all(&ops, &json!("T12345")), json!("T12345"));
    }

    #[test]
    fn test_nulls_pass_through() {
        assert_eq!(op(json!({"type": "trim"})).apply(&Value::Null), Value::Null);
    }
}
