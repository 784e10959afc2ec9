//! Builtin loaders.

use serde_json::Value;
use std::path::Path;

use crate::error::{DataError, DataResult};
use crate::models::{Kwargs, Table};
use crate::parser::{self, CsvOptions};

/// `format: csv`
///
/// Accepts `delimiter`, `encoding` and `infer_types` (default true).
pub fn csv(path: &Path, kwargs: &Kwargs) -> DataResult<Table> {
    let delimiter = match kwargs.get("delimiter") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.chars().count() == 1 => s.chars().next(),
        Some(other) => {
            return Err(DataError::failed(
                "csv",
                format!("delimiter must be a single character, got {}", other),
            ))
        }
    };
    let options = CsvOptions {
        delimiter,
        encoding: kwargs
            .get("encoding")
            .and_then(Value::as_str)
            .map(str::to_string),
        infer_types: kwargs
            .get("infer_types")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    };

    let result = parser::parse_csv_file(path, &options)?;
    tracing::debug!(
        "read {} rows from {} (encoding {}, delimiter {:?})",
        result.table.len(),
        path.display(),
        result.encoding,
        result.delimiter
    );
    Ok(result.table)
}

/// `format: json`
///
/// Reads an array of records. With `lines: true`, one record per line.
pub fn json(path: &Path, kwargs: &Kwargs) -> DataResult<Table> {
    let content = std::fs::read_to_string(path).map_err(|e| DataError::io(path.display().to_string(), e))?;
    let lines = kwargs.get("lines").and_then(Value::as_bool).unwrap_or(false);

    let records: Vec<Value> = if lines {
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    } else {
        match serde_json::from_str(&content)? {
            Value::Array(items) => items,
            _ => return Err(DataError::failed("json", "expected an array of records")),
        }
    };
    Table::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn file(content: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_csv_loader_detects_delimiter() {
        let f = file("id;score\na;1\nb;2\n", ".csv");
        let table = csv(f.path(), &Kwargs::new()).unwrap();
        assert_eq!(table.headers, vec!["id", "score"]);
        assert_eq!(table.rows[1]["score"], 2);
    }

    #[test]
    fn test_csv_loader_without_inference() {
        let f = file("id,score\na,1\n", ".csv");
        let mut kwargs = Kwargs::new();
        kwargs.insert("infer_types".into(), json!(false));
        kwargs.insert("delimiter".into(), json!(","));
        let table = csv(f.path(), &kwargs).unwrap();
        assert_eq!(table.rows[0]["score"], "1");
    }

    #[test]
    fn test_csv_loader_rejects_long_delimiter() {
        let f = file("a,b\n", ".csv");
        let mut kwargs = Kwargs::new();
        kwargs.insert("delimiter".into(), json!(",,"));
        assert!(csv(f.path(), &kwargs).is_err());
    }

    #[test]
    fn test_json_loader() {
        let f = file(r#"[{"id": "a", "v": 1}, {"id": "b", "v": 2}]"#, ".json");
        let table = json(f.path(), &Kwargs::new()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.headers, vec!["id", "v"]);
    }

    #[test]
    fn test_json_lines_loader() {
        let f = file("{\"id\": \"a\"}\n\n{\"id\": \"b\"}\n", ".jsonl");
        let mut kwargs = Kwargs::new();
        kwargs.insert("lines".into(), json!(true));
        let table = json(f.path(), &kwargs).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_json_loader_missing_file() {
        let err = json(Path::new("/nonexistent/data.json"), &Kwargs::new()).unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }
}
