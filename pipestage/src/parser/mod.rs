//! CSV decoding with encoding and delimiter auto-detection.
//!
//! Turns raw bytes into a [`Table`]. Empty cells become `null`; with type
//! inference on, numeric and boolean cells become JSON numbers and booleans.

use serde_json::{Map, Number, Value};
use std::path::Path;

use crate::models::Table;

/// CSV decoding error with context
#[derive(Debug, Clone)]
pub struct CsvError {
    pub line: usize,
    pub column: Option<String>,
    pub message: String,
}

impl std::fmt::Display for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.column {
            Some(col) => write!(f, "Line {}, column '{}': {}", self.line, col, self.message),
            None => write!(f, "Line {}: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for CsvError {}

impl CsvError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// Options controlling how CSV bytes are decoded.
#[derive(Debug, Clone, Default)]
pub struct CsvOptions {
    /// Delimiter; detected from the header line when `None`
    pub delimiter: Option<char>,
    /// Encoding label; detected when `None`
    pub encoding: Option<String>,
    /// Turn numeric and boolean cells into typed JSON values
    pub infer_types: bool,
}

/// Decoded table with detection metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub table: Table,
    pub encoding: String,
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the given encoding label
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.to_string()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
        // utf-8, ascii and anything unknown
        _ => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Read and decode a CSV file.
pub fn parse_csv_file(path: &Path, options: &CsvOptions) -> Result<ParseResult, CsvError> {
    let bytes = std::fs::read(path)
        .map_err(|e| CsvError::new(0, format!("Cannot read '{}': {}", path.display(), e)))?;
    parse_bytes(&bytes, options)
}

/// Decode CSV bytes, detecting whatever the options leave open.
pub fn parse_bytes(bytes: &[u8], options: &CsvOptions) -> Result<ParseResult, CsvError> {
    let encoding = options
        .encoding
        .clone()
        .unwrap_or_else(|| detect_encoding(bytes));
    let content = decode_content(bytes, &encoding);
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = options
        .delimiter
        .unwrap_or_else(|| detect_delimiter(content));

    let table = parse_str(content, delimiter, options.infer_types)?;
    Ok(ParseResult {
        table,
        encoding,
        delimiter,
    })
}

/// Decode CSV text with an explicit delimiter.
pub fn parse_str(content: &str, delimiter: char, infer_types: bool) -> Result<Table, CsvError> {
    if content.trim().is_empty() {
        return Err(CsvError::new(1, "Empty CSV file"));
    }
    let delimiter = u8::try_from(delimiter)
        .map_err(|_| CsvError::new(0, format!("Delimiter '{}' is not a single byte", delimiter)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CsvError::new(1, format!("Cannot read header: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(String::is_empty) {
        return Err(CsvError::new(1, "No headers found"));
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = record.map_err(|e| CsvError::new(line, e.to_string()))?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let raw = record.get(i).unwrap_or("");
            row.insert(header.clone(), cell_value(raw, infer_types));
        }
        rows.push(row);
    }

    Ok(Table::new(headers, rows))
}

/// Convert one raw cell.
fn cell_value(raw: &str, infer_types: bool) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if infer_types {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Number(i.into());
        }
        if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
        match raw {
            "true" | "True" | "TRUE" => return Value::Bool(true),
            "false" | "False" | "FALSE" => return Value::Bool(false),
            _ => {}
        }
    }
    Value::String(raw.to_string())
}

/// Render a cell for CSV output; nulls become empty fields.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_csv() {
        let table = parse_str("name;age\nAlice;30\nBob;25", ';', false).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.headers, vec!["name", "age"]);
        assert_eq!(table.rows[0]["name"], "Alice");
        assert_eq!(table.rows[0]["age"], "30");
        assert_eq!(table.rows[1]["name"], "Bob");
    }

    #[test]
    fn test_quoted_values() {
        let csv = "name,value\n\"Alice\",\"Hello, World\"";
        let table = parse_str(csv, ',', false).unwrap();

        assert_eq!(table.rows[0]["name"], "Alice");
        assert_eq!(table.rows[0]["value"], "Hello, World");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let table = parse_str("a;b\n1;2\n\n3;4\n", ';', false).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_missing_values_are_null() {
        let table = parse_str("a;b;c\n1;;3", ';', false).unwrap();

        assert_eq!(table.rows[0]["a"], "1");
        assert_eq!(table.rows[0]["b"], Value::Null);
        assert_eq!(table.rows[0]["c"], "3");
    }

    #[test]
    fn test_short_rows_padded() {
        let table = parse_str("a;b;c\n1", ';', false).unwrap();
        assert_eq!(table.rows[0]["c"], Value::Null);
    }

    #[test]
    fn test_type_inference() {
        let table = parse_str("i,f,b,s\n1,2.5,true,x", ',', true).unwrap();
        let row = &table.rows[0];
        assert_eq!(row["i"], 1);
        assert_eq!(row["f"], 2.5);
        assert_eq!(row["b"], true);
        assert_eq!(row["s"], "x");
    }

    #[test]
    fn test_error_message_format() {
        let err = CsvError::new(5, "Invalid value").with_column("age");
        let msg = err.to_string();
        assert!(msg.contains("Line 5"));
        assert!(msg.contains("column 'age'"));
    }

    #[test]
    fn test_empty_csv_error() {
        let err = parse_str("", ';', false).unwrap_err();
        assert!(err.message.contains("Empty"));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
    }

    #[test]
    fn test_auto_parse() {
        let result = parse_bytes(b"name;age\nAlice;30\nBob;25", &CsvOptions::default()).unwrap();

        assert_eq!(result.delimiter, ';');
        assert_eq!(result.encoding, "utf-8");
        assert_eq!(result.table.len(), 2);
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&Value::from(3)), "3");
        assert_eq!(cell_text(&Value::from("a")), "a");
    }
}
