//! Builtin writers. Parent directories are created by the caller.

use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{DataError, DataResult};
use crate::models::{Kwargs, Table};
use crate::parser::cell_text;

/// `format: csv`
///
/// Accepts `delimiter` (default `,`). Columns follow the table's headers.
pub fn csv(data: &Table, path: &Path, kwargs: &Kwargs) -> DataResult<()> {
    let delimiter = match kwargs.get("delimiter").and_then(Value::as_str) {
        None => b',',
        Some(s) if s.len() == 1 => s.as_bytes()[0],
        Some(s) => {
            return Err(DataError::failed(
                "csv",
                format!("delimiter must be a single byte, got '{}'", s),
            ))
        }
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;
    writer.write_record(&data.headers)?;
    for row in &data.rows {
        writer.write_record(data.headers.iter().map(|h| cell_text(Table::cell(row, h))))?;
    }
    writer
        .flush()
        .map_err(|e| DataError::io(path.display().to_string(), e))?;
    Ok(())
}

/// `format: json`
///
/// Writes an array of records; `pretty: true` indents it.
pub fn json(data: &Table, path: &Path, kwargs: &Kwargs) -> DataResult<()> {
    let file = File::create(path).map_err(|e| DataError::io(path.display().to_string(), e))?;
    let mut writer = BufWriter::new(file);
    let pretty = kwargs.get("pretty").and_then(Value::as_bool).unwrap_or(false);
    if pretty {
        serde_json::to_writer_pretty(&mut writer, &data.rows)?;
    } else {
        serde_json::to_writer(&mut writer, &data.rows)?;
    }
    writer
        .flush()
        .map_err(|e| DataError::io(path.display().to_string(), e))?;
    Ok(())
}
