//! Builtin transformations.
//!
//! Each takes `None` while tracing and must answer with a placeholder of
//! the shape it would produce for real data.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use super::operations::{apply_all, CellOp};
use crate::error::{DataError, DataResult};
use crate::models::table::str_arg;
use crate::models::{Container, Kwargs, Table};

// =============================================================================
// split
// =============================================================================

/// Split one table into two named tables.
///
/// `by` selects the strategy:
/// - `position`: the first `size` fraction of rows goes left
/// - `id`: a seeded shuffle of the distinct values of `id_col`; the first
///   `size` fraction of ids goes left
/// - `date_time`: rows before a split point go left; the point is
///   `split_date`, or `size` of the `freq` periods (`M` or `D`) spanned by
///   `date_column`
pub fn split(data: Option<Table>, kwargs: &Kwargs) -> DataResult<Container> {
    let left_name = str_arg("split", kwargs, "left_split_name")?;
    let right_name = str_arg("split", kwargs, "right_split_name")?;

    let Some(data) = data else {
        tracing::debug!("tracing split into '{}' and '{}'", left_name, right_name);
        return Ok(Container::keyed([
            (left_name, Container::Empty),
            (right_name, Container::Empty),
        ]));
    };

    let by = str_arg("split", kwargs, "by")?;
    let mask = match by {
        "position" => position_mask(&data, size_arg(kwargs)?),
        "id" => id_mask(&data, kwargs)?,
        "date_time" => date_mask(&data, kwargs)?,
        other => return Err(DataError::failed("split", format!("invalid choice for split: {}", other))),
    };
    let inverse: Vec<bool> = mask.iter().map(|b| !b).collect();

    let left = data.filter_rows(&mask);
    let right = data.filter_rows(&inverse);
    tracing::debug!(
        "split by {}: {} rows in '{}', {} rows in '{}'",
        by,
        left.len(),
        left_name,
        right.len(),
        right_name
    );
    Ok(Container::keyed([
        (left_name, Container::Leaf(left)),
        (right_name, Container::Leaf(right)),
    ]))
}

fn size_arg(kwargs: &Kwargs) -> DataResult<f64> {
    let size = kwargs
        .get("size")
        .and_then(Value::as_f64)
        .ok_or_else(|| DataError::failed("split", "missing numeric argument 'size'"))?;
    if !(0.0..=1.0).contains(&size) {
        return Err(DataError::failed("split", format!("size must be within [0, 1], got {}", size)));
    }
    Ok(size)
}

fn position_mask(data: &Table, size: f64) -> Vec<bool> {
    let cut = (size * data.len() as f64).round() as usize;
    (0..data.len()).map(|i| i < cut).collect()
}

fn id_mask(data: &Table, kwargs: &Kwargs) -> DataResult<Vec<bool>> {
    let size = size_arg(kwargs)?;
    let id_col = str_arg("split", kwargs, "id_col")?;
    if !data.has_column(id_col) {
        return Err(DataError::MissingColumn(id_col.to_string()));
    }
    let seed = kwargs.get("seed").and_then(Value::as_u64).unwrap_or(0);

    let mut ids: Vec<String> = data
        .rows
        .iter()
        .map(|row| Table::cell(row, id_col).to_string())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    // shuffle from a sorted list so the split only depends on the seed
    ids.sort();
    ids.shuffle(&mut StdRng::seed_from_u64(seed));
    let keep = (size * ids.len() as f64) as usize;
    let left: HashSet<&String> = ids.iter().take(keep).collect();

    Ok(data
        .rows
        .iter()
        .map(|row| left.contains(&Table::cell(row, id_col).to_string()))
        .collect())
}

/// Parse a cell as a timestamp. Dates without a time start at midnight.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn date_mask(data: &Table, kwargs: &Kwargs) -> DataResult<Vec<bool>> {
    let column = kwargs
        .get("date_column")
        .and_then(Value::as_str)
        .unwrap_or("date_time");
    let stamps = data
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            parse_timestamp(Table::cell(row, column)).ok_or_else(|| {
                DataError::failed("split", format!("row {}: '{}' is not a date", i, column))
            })
        })
        .collect::<DataResult<Vec<_>>>()?;

    let split_point = match kwargs.get("split_date") {
        Some(value) => parse_timestamp(value)
            .ok_or_else(|| DataError::failed("split", format!("invalid split_date {}", value)))?,
        None => periodic_split_point(&stamps, size_arg(kwargs)?, kwargs)?,
    };
    tracing::info!("date split at {}", split_point);

    Ok(stamps.iter().map(|t| *t < split_point).collect())
}

/// Start of the period `round(size * periods)` periods after the first one.
fn periodic_split_point(stamps: &[NaiveDateTime], size: f64, kwargs: &Kwargs) -> DataResult<NaiveDateTime> {
    let (Some(first), Some(last)) = (stamps.iter().min(), stamps.iter().max()) else {
        return Err(DataError::failed("split", "cannot split an empty table by date"));
    };
    let (start, last) = (first.date(), last.date());
    let freq = kwargs.get("freq").and_then(Value::as_str).unwrap_or("M");

    let point = match freq {
        "M" | "MS" => {
            let start = start.with_day(1).unwrap_or(start);
            let periods = (last.year() - start.year()) * 12 + last.month() as i32 - start.month() as i32 + 1;
            let offset = (size * periods as f64).round() as u32;
            start.checked_add_months(Months::new(offset))
        }
        "D" => {
            let periods = (last - start).num_days() + 1;
            let offset = (size * periods as f64).round() as i64;
            start.checked_add_signed(TimeDelta::days(offset))
        }
        other => return Err(DataError::failed("split", format!("unsupported freq '{}'", other))),
    };
    point
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| DataError::failed("split", "split point out of range"))
}

// =============================================================================
// filter
// =============================================================================

/// Keep rows whose `column` matches `pattern`; `invert: true` drops them
/// instead. Null cells never match.
pub fn filter(data: Option<Table>, kwargs: &Kwargs) -> DataResult<Container> {
    let column = str_arg("filter", kwargs, "column")?;
    let pattern = str_arg("filter", kwargs, "pattern")?;
    let invert = kwargs.get("invert").and_then(Value::as_bool).unwrap_or(false);
    let re = Regex::new(pattern)
        .map_err(|e| DataError::failed("filter", format!("bad pattern '{}': {}", pattern, e)))?;

    let Some(data) = data else {
        return Ok(Container::Empty);
    };
    if !data.has_column(column) {
        return Err(DataError::MissingColumn(column.to_string()));
    }

    let mask: Vec<bool> = data
        .rows
        .iter()
        .map(|row| {
            let hit = match Table::cell(row, column) {
                Value::Null => false,
                Value::String(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            };
            hit != invert
        })
        .collect();
    let kept = data.filter_rows(&mask);
    tracing::debug!("filter on '{}' kept {}/{} rows", column, kept.len(), data.len());
    Ok(Container::Leaf(kept))
}

// =============================================================================
// map_column
// =============================================================================

/// Apply cell operations to one column, in place or into `target`.
pub fn map_column(data: Option<Table>, kwargs: &Kwargs) -> DataResult<Container> {
    let column = str_arg("map_column", kwargs, "column")?;
    let target = kwargs
        .get("target")
        .and_then(Value::as_str)
        .unwrap_or(column)
        .to_string();
    let ops: Vec<CellOp> = match kwargs.get("operations") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| DataError::failed("map_column", format!("invalid operations: {}", e)))?,
        None => return Err(DataError::failed("map_column", "missing list argument 'operations'")),
    };
    let ops = ops
        .into_iter()
        .map(CellOp::compile)
        .collect::<DataResult<Vec<_>>>()?;

    let Some(mut data) = data else {
        return Ok(Container::Empty);
    };
    if !data.has_column(column) {
        return Err(DataError::MissingColumn(column.to_string()));
    }

    for row in &mut data.rows {
        let mapped = apply_all(&ops, Table::cell(row, column));
        row.insert(target.clone(), mapped);
    }
    if !data.has_column(&target) {
        data.headers.push(target);
    }
    Ok(Container::Leaf(data))
}
