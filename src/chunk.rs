//! Normalizer & chunker (component A): splits document text into
//! deterministic, stably-identified chunks.
//!
//! Chunk ids are content-derived (`sha256(ordinal|heading|body)[:24]`, see
//! [`stable_chunk_id`]) so re-chunking the same document always yields the
//! same ids, which is what makes the result cache's cache key stable across
//! runs of the same document.

use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::model::ReviewChunk;

pub const CHUNK_SCHEMA_VERSION: &str = "v1";

const ROW_WINDOW_SIZE: usize = 5;

static HEADING_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(section\s+)?\d+(\.\d+)*\s*[\).:-]?\s+.+$").unwrap()
});

/// Normalize line endings and trailing whitespace.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(|l| l.trim_end()).collect();
    lines.join("\n").trim().to_string()
}

/// Heuristic heading detector: numbered sections, short ALL-CAPS lines, and
/// lines ending in a colon are treated as headings.
pub fn is_heading_line(line: &str) -> bool {
    let stripped = line.trim();
    if stripped.is_empty() {
        return false;
    }

    if HEADING_SECTION_RE.is_match(stripped) {
        return true;
    }

    if stripped.chars().count() <= 120
        && stripped.to_uppercase() == stripped
        && stripped.contains(' ')
    {
        return true;
    }

    if stripped.ends_with(':') && stripped.chars().count() <= 120 {
        return true;
    }

    false
}

/// Split normalized text into blocks separated by one or more blank lines.
fn split_into_blocks(text: &str) -> Vec<&str> {
    static BLANK_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());
    BLANK_LINE_RE
        .split(text)
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect()
}

pub fn stable_chunk_id(ordinal: i64, heading: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{ordinal}|{heading}|{body}").as_bytes());
    let digest = hasher.finalize();
    format!("chk_{:x}", digest)
        .chars()
        .take(4 + 24)
        .collect()
}

/// Split document text into chunks for plain text and PDF sources.
fn text_chunks(text: &str) -> Vec<ReviewChunk> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let blocks = split_into_blocks(&normalized);
    let mut chunks = Vec::with_capacity(blocks.len());
    let mut cursor = 0usize;

    for (idx, block) in blocks.iter().enumerate() {
        let ordinal = (idx + 1) as i64;
        let mut lines = block.lines();
        let first_line = lines.next().unwrap_or("").trim();

        let (heading, body) = if is_heading_line(first_line) {
            let rest: String = block
                .lines()
                .skip(1)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
            (first_line.to_string(), rest)
        } else {
            (String::new(), block.to_string())
        };

        let heading = if heading.is_empty() {
            format!("Clause {ordinal}")
        } else {
            heading
        };
        let body = if body.is_empty() { heading.clone() } else { body };

        let start_offset = normalized[cursor..]
            .find(block as &str)
            .map(|p| p + cursor)
            .or_else(|| normalized.find(block as &str));
        let end_offset = start_offset.map(|s| s + block.len());
        if let Some(end) = end_offset {
            cursor = end;
        }

        chunks.push(ReviewChunk {
            id: String::new(),
            run_id: String::new(),
            document_id: String::new(),
            chunk_id: stable_chunk_id(ordinal, &heading, &body),
            schema_version: CHUNK_SCHEMA_VERSION.to_string(),
            ordinal,
            heading,
            body,
            start_offset: start_offset.map(|v| v as i64),
            end_offset: end_offset.map(|v| v as i64),
            metadata: json!({}),
        });
    }

    if chunks.is_empty() {
        chunks.push(ReviewChunk {
            id: String::new(),
            run_id: String::new(),
            document_id: String::new(),
            chunk_id: stable_chunk_id(1, "Document", &normalized),
            schema_version: CHUNK_SCHEMA_VERSION.to_string(),
            ordinal: 1,
            heading: "Document".to_string(),
            body: normalized.clone(),
            start_offset: Some(0),
            end_offset: Some(normalized.len() as i64),
            metadata: json!({}),
        });
    }

    chunks
}

/// Window a spreadsheet's canonical rows into fixed-size row groups.
fn spreadsheet_chunks(metadata: &Value) -> Vec<ReviewChunk> {
    let mut chunks = Vec::new();
    let mut ordinal = 1i64;

    let Some(sheets) = metadata.get("sheets").and_then(Value::as_array) else {
        return chunks;
    };

    for sheet in sheets {
        let sheet_name = sheet.get("name").and_then(Value::as_str).unwrap_or("Sheet");
        let Some(rows) = sheet.get("rows").and_then(Value::as_array) else {
            continue;
        };
        if rows.is_empty() {
            continue;
        }

        for window in rows.chunks(ROW_WINDOW_SIZE) {
            let row_start = window[0].get("row_number").and_then(Value::as_i64).unwrap_or(0);
            let row_end = window[window.len() - 1]
                .get("row_number")
                .and_then(Value::as_i64)
                .unwrap_or(row_start);
            let heading = format!("{sheet_name} rows {row_start}-{row_end}");

            let body_lines: Vec<String> = window
                .iter()
                .filter_map(|row| {
                    let row_num = row.get("row_number").and_then(Value::as_i64)?;
                    let row_text = row.get("text").and_then(Value::as_str).unwrap_or("");
                    if row_text.is_empty() {
                        None
                    } else {
                        Some(format!("Row {row_num}: {row_text}"))
                    }
                })
                .collect();
            let body = {
                let joined = body_lines.join("\n");
                if joined.trim().is_empty() {
                    heading.clone()
                } else {
                    joined
                }
            };

            chunks.push(ReviewChunk {
                id: String::new(),
                run_id: String::new(),
                document_id: String::new(),
                chunk_id: stable_chunk_id(ordinal, &heading, &body),
                schema_version: CHUNK_SCHEMA_VERSION.to_string(),
                ordinal,
                heading,
                body,
                start_offset: None,
                end_offset: None,
                metadata: json!({
                    "source": "spreadsheet",
                    "evidence_pointer": {
                        "kind": "spreadsheet",
                        "sheet": sheet_name,
                        "row_start": row_start,
                        "row_end": row_end,
                    },
                }),
            });
            ordinal += 1;
        }
    }

    chunks
}

/// Split a document's text (or spreadsheet rows, if `ingestion_metadata`
/// describes one) into deterministic chunk artifacts.
pub fn chunk_document(text: &str, source_type: &str, ingestion_metadata: &Value) -> Vec<ReviewChunk> {
    if source_type == "spreadsheet" && ingestion_metadata.is_object() {
        let sheet_chunks = spreadsheet_chunks(ingestion_metadata);
        if !sheet_chunks.is_empty() {
            return sheet_chunks;
        }
    }

    text_chunks(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_whitespace_and_crlf() {
        let text = "line one \r\nline two\r\n\r\n";
        assert_eq!(normalize_text(text), "line one\nline two");
    }

    #[test]
    fn heading_detection_matches_numbered_sections() {
        assert!(is_heading_line("Section 5.2 Termination"));
        assert!(is_heading_line("1. Termination"));
        assert!(is_heading_line("TERMINATION RIGHTS"));
        assert!(is_heading_line("Termination:"));
        assert!(!is_heading_line("This is a normal sentence in a clause."));
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "1. Termination\nEither party may terminate with 30 days notice.\n\n2. Confidentiality\nTerms remain confidential.";
        let a = chunk_document(text, "text", &Value::Null);
        let b = chunk_document(text, "text", &Value::Null);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
        }
        assert_eq!(a[0].heading, "1. Termination");
        assert_eq!(a[1].heading, "2. Confidentiality");
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        assert!(chunk_document("   \n\n  ", "text", &Value::Null).is_empty());
    }

    #[test]
    fn fallback_chunk_when_no_blank_line_separators() {
        let text = "just one continuous paragraph with no blank lines anywhere in it";
        let chunks = chunk_document(text, "text", &Value::Null);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "Clause 1");
    }

    #[test]
    fn spreadsheet_windowing_groups_rows() {
        let metadata = json!({
            "kind": "spreadsheet",
            "schema_version": "v1",
            "sheets": [{
                "name": "Sheet1",
                "columns": ["name", "amount"],
                "rows": (2..=8).map(|n| json!({
                    "row_number": n,
                    "cells": ["x", "1"],
                    "cell_map": {"name": "x", "amount": "1"},
                    "text": "name=x ; amount=1",
                })).collect::<Vec<_>>(),
            }]
        });
        let chunks = chunk_document("", "spreadsheet", &metadata);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading, "Sheet1 rows 2-6");
        assert_eq!(chunks[1].heading, "Sheet1 rows 7-8");
        assert!(chunks[0].start_offset.is_none());
        assert_eq!(chunks[0].metadata["evidence_pointer"]["row_start"], 2);
    }
}
