//! Document ingestion: turns raw upload bytes into a `Document`.
//!
//! Text files pass through as-is. PDFs are extracted with `pdf-extract` off
//! the async executor (extraction is CPU-bound and blocking). CSV and XLSX
//! both canonicalize into the same `{kind: "spreadsheet", ...}` metadata
//! shape and flattened `[Sheet: ...] / Row n: k=v ; k=v` text rendering, so
//! downstream chunking never has to know the source format.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Document, SourceType};

pub const SPREADSHEET_SCHEMA_VERSION: &str = "v1";

/// Ingest raw upload bytes into a `Document`, dispatching on file extension.
pub async fn ingest(filename: &str, bytes: Vec<u8>) -> Result<Document> {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let (text, source_type, ingestion_metadata) = match ext.as_str() {
        "txt" | "md" | "text" => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            (text, SourceType::Text, Value::Null)
        }
        "pdf" => {
            let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("pdf extraction task panicked: {e}")))?
                .map_err(|e| Error::BadRequest(format!("failed to extract text from pdf: {e}")))?;
            (text, SourceType::Pdf, Value::Null)
        }
        "csv" => {
            let (text, metadata) = parse_csv_bytes(&bytes);
            (text, SourceType::Spreadsheet, metadata)
        }
        "xlsx" => {
            let (text, metadata) = tokio::task::spawn_blocking(move || parse_xlsx_bytes(&bytes))
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("xlsx parsing task panicked: {e}")))?
                .map_err(|e| Error::BadRequest(format!("failed to parse xlsx: {e}")))?;
            (text, SourceType::Spreadsheet, metadata)
        }
        other => {
            return Err(Error::UnsupportedFileType(format!(
                "unrecognized file extension: {other}"
            )));
        }
    };

    let now = chrono::Utc::now().to_rfc3339();
    Ok(Document {
        id: Uuid::new_v4().to_string(),
        title: filename.to_string(),
        text,
        source_type,
        ingestion_metadata,
        created_at: now,
    })
}

fn normalize_cell(value: &str) -> String {
    value.trim().to_string()
}

/// Flatten a cell-map into `k=v ; k=v`, skipping empty values.
fn row_text_from_map(cell_map: &BTreeMap<String, String>, order: &[String]) -> String {
    let pairs: Vec<String> = order
        .iter()
        .filter_map(|key| {
            let v = cell_map.get(key)?;
            if v.is_empty() {
                None
            } else {
                Some(format!("{key}={v}"))
            }
        })
        .collect();
    pairs.join(" ; ")
}

/// Canonicalize parsed rows (first row treated as a header if any cell in it
/// is non-empty) into the `{name, columns, rows}` shape.
fn sheet_to_canonical(name: &str, rows: Vec<Vec<String>>) -> Value {
    if rows.is_empty() {
        return json!({ "name": name, "columns": [], "rows": [] });
    }

    let header: Vec<String> = rows[0].iter().map(|h| h.trim().to_string()).collect();
    let has_header = header.iter().any(|h| !h.is_empty());
    let (data_rows, row_start): (&[Vec<String>], i64) = if has_header {
        (&rows[1..], 2)
    } else {
        (&rows[..], 1)
    };

    let mut canonical_rows = Vec::with_capacity(data_rows.len());
    for (offset, row) in data_rows.iter().enumerate() {
        let row_number = row_start + offset as i64;
        let col_count = row.len().max(header.len());
        let cells: Vec<String> = (0..col_count)
            .map(|idx| row.get(idx).cloned().unwrap_or_default().trim().to_string())
            .collect();

        let mut cell_map = BTreeMap::new();
        let mut order = Vec::with_capacity(cells.len());
        for (idx, val) in cells.iter().enumerate() {
            let key = header
                .get(idx)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("col_{}", idx + 1));
            order.push(key.clone());
            cell_map.insert(key, val.clone());
        }

        let row_text = row_text_from_map(&cell_map, &order);
        canonical_rows.push(json!({
            "row_number": row_number,
            "cells": cells,
            "cell_map": cell_map,
            "text": row_text,
        }));
    }

    json!({
        "name": name,
        "columns": if has_header { header } else { Vec::<String>::new() },
        "rows": canonical_rows,
    })
}

fn canonical_to_text(metadata: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(sheets) = metadata.get("sheets").and_then(Value::as_array) {
        for sheet in sheets {
            let sheet_name = sheet.get("name").and_then(Value::as_str).unwrap_or("Sheet");
            parts.push(format!("[Sheet: {sheet_name}]"));
            if let Some(rows) = sheet.get("rows").and_then(Value::as_array) {
                for row in rows {
                    let row_num = row.get("row_number").and_then(Value::as_i64).unwrap_or(0);
                    let row_text = row.get("text").and_then(Value::as_str).unwrap_or("");
                    if !row_text.is_empty() {
                        parts.push(format!("Row {row_num}: {row_text}"));
                    }
                }
            }
            parts.push(String::new());
        }
    }
    parts.join("\n").trim().to_string()
}

/// Parse a CSV byte stream (UTF-8 with an optional BOM) into canonical
/// spreadsheet text + metadata. Hand-rolled rather than pulled from a CSV
/// crate: quoting rules here only need to cover the common case (quoted
/// fields with embedded commas/newlines, doubled-quote escaping).
fn parse_csv_bytes(raw: &[u8]) -> (String, Value) {
    let decoded = String::from_utf8_lossy(raw);
    let decoded = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);
    let rows: Vec<Vec<String>> = parse_csv_rows(decoded)
        .into_iter()
        .map(|row| row.iter().map(|c| normalize_cell(c)).collect())
        .collect();

    let metadata = json!({
        "kind": "spreadsheet",
        "schema_version": SPREADSHEET_SCHEMA_VERSION,
        "sheets": [sheet_to_canonical("Sheet1", rows)],
    });
    let text = canonical_to_text(&metadata);
    (text, metadata)
}

fn parse_csv_rows(input: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();
    let mut saw_any = false;

    while let Some(c) = chars.next() {
        saw_any = true;
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            other => field.push(other),
        }
    }

    if saw_any && (!field.is_empty() || !row.is_empty()) {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// Parse an XLSX workbook into canonical spreadsheet text + metadata, one
/// sheet per worksheet. Runs on a blocking thread (called via
/// `spawn_blocking`): `calamine` reads are synchronous and can be
/// CPU-bound for large workbooks.
fn parse_xlsx_bytes(raw: &[u8]) -> std::result::Result<(String, Value), String> {
    let cursor = Cursor::new(raw);
    let mut workbook: Xlsx<_> =
        calamine::open_workbook_from_rs(cursor).map_err(|e| e.to_string())?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = workbook.worksheet_range(&name).map_err(|e| e.to_string())?;
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(data_to_cell).collect())
            .collect();
        sheets.push(sheet_to_canonical(&name, rows));
    }

    let metadata = json!({
        "kind": "spreadsheet",
        "schema_version": SPREADSHEET_SCHEMA_VERSION,
        "sheets": sheets,
    });
    let text = canonical_to_text(&metadata);
    Ok((text, metadata))
}

/// Mirrors `_normalize_cell`'s `None -> ""` handling: an empty calamine cell
/// renders as `Data::Empty`, which stringifies to the empty string here too.
fn data_to_cell(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        other => normalize_cell(&other.to_string()),
    }
}
