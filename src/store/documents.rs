use anyhow::Context as _;
use sqlx::Row as _;

use crate::error::{Error, Result};
use crate::model::{Document, SourceType};

use super::ReviewStore;

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Document> {
    let source_type_value: String = row
        .try_get("source_type")
        .context("failed to read document source_type")?;
    let source_type = SourceType::parse(&source_type_value)
        .with_context(|| format!("invalid source_type in database: {source_type_value}"))?;

    let metadata_value: String = row
        .try_get("ingestion_metadata")
        .unwrap_or_else(|_| "null".to_string());

    Ok(Document {
        id: row.try_get("id").context("failed to read document id")?,
        title: row.try_get("title").context("failed to read document title")?,
        text: row.try_get("text").context("failed to read document text")?,
        source_type,
        ingestion_metadata: serde_json::from_str(&metadata_value).unwrap_or(serde_json::Value::Null),
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .map(|v| v.and_utc().to_rfc3339())
            .context("failed to read document created_at")?,
    })
}

impl ReviewStore {
    pub async fn create_document(&self, document: &Document) -> Result<()> {
        let metadata_json = document.ingestion_metadata.to_string();
        sqlx::query(
            "INSERT INTO documents (id, title, text, source_type, ingestion_metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.text)
        .bind(document.source_type.as_str())
        .bind(&metadata_json)
        .execute(self.pool())
        .await
        .context("failed to insert document")?;
        Ok(())
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, title, text, source_type, ingestion_metadata, created_at FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to fetch document")?;

        match row {
            Some(row) => document_from_row(row),
            None => Err(Error::DocumentNotFound(document_id.to_string())),
        }
    }
}
