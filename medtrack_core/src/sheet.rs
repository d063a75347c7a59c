//! Loading log rows from spreadsheet exports.
//!
//! Supports CSV (header row gives column names) and JSON (an array of
//! string-to-string objects).

use crate::{Error, LogRow, Result};
use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

/// Read rows from a file, choosing the format from its extension
pub fn read_rows(path: &Path) -> Result<Vec<LogRow>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    let rows = match extension.as_deref() {
        Some("csv") => read_csv_rows(std::fs::File::open(path)?)?,
        Some("json") => read_json_rows(std::fs::File::open(path)?)?,
        other => {
            return Err(Error::Other(format!(
                "Unsupported row file {:?} (extension {:?}); expected .csv or .json",
                path, other
            )))
        }
    };

    tracing::info!("Read {} rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Read rows from CSV with a header line
///
/// Short records are allowed; missing cells are simply absent from the row.
pub fn read_csv_rows<R: Read>(reader: R) -> Result<Vec<LogRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record?;
        let row: LogRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Read rows from a JSON array of objects with string values
pub fn read_json_rows<R: Read>(reader: R) -> Result<Vec<LogRow>> {
    let rows: Vec<LogRow> = serde_json::from_reader(reader)?;
    Ok(rows)
}
