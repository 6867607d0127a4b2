use anyhow::Context as _;
use sqlx::Row as _;
use uuid::Uuid;

use crate::error::Result;
use crate::model::ReviewChunk;

use super::ReviewStore;

fn chunk_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ReviewChunk> {
    let metadata_value: String = row.try_get("metadata").unwrap_or_else(|_| "{}".to_string());
    Ok(ReviewChunk {
        id: row.try_get("id").context("failed to read chunk id")?,
        run_id: row.try_get("run_id").context("failed to read chunk run_id")?,
        document_id: row
            .try_get("document_id")
            .context("failed to read chunk document_id")?,
        chunk_id: row.try_get("chunk_id").context("failed to read chunk_id")?,
        schema_version: row
            .try_get("schema_version")
            .context("failed to read chunk schema_version")?,
        ordinal: row.try_get("ordinal").context("failed to read chunk ordinal")?,
        heading: row.try_get("heading").context("failed to read chunk heading")?,
        body: row.try_get("body").context("failed to read chunk body")?,
        start_offset: row.try_get("start_offset").ok(),
        end_offset: row.try_get("end_offset").ok(),
        metadata: serde_json::from_str(&metadata_value).unwrap_or_else(|_| serde_json::json!({})),
    })
}

impl ReviewStore {
    /// Delete existing chunks for `run_id` and bulk-insert the new ones,
    /// atomically — any number of re-executions converge to the same set.
    pub async fn persist_chunks_for_run(
        &self,
        run_id: &str,
        document_id: &str,
        chunks: &[ReviewChunk],
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("failed to open chunk persistence transaction")?;

        sqlx::query("DELETE FROM review_chunks WHERE run_id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete existing chunks")?;

        for chunk in chunks {
            let metadata_json = chunk.metadata.to_string();
            sqlx::query(
                r#"
                INSERT INTO review_chunks (
                    id, run_id, document_id, chunk_id, schema_version, ordinal,
                    heading, body, start_offset, end_offset, metadata
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(run_id)
            .bind(document_id)
            .bind(&chunk.chunk_id)
            .bind(&chunk.schema_version)
            .bind(chunk.ordinal)
            .bind(&chunk.heading)
            .bind(&chunk.body)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .context("failed to insert chunk")?;
        }

        tx.commit()
            .await
            .context("failed to commit chunk persistence transaction")?;
        Ok(())
    }

    pub async fn get_chunks_for_run(&self, run_id: &str) -> Result<Vec<ReviewChunk>> {
        let rows = sqlx::query(
            "SELECT id, run_id, document_id, chunk_id, schema_version, ordinal, heading, body, start_offset, end_offset, metadata FROM review_chunks WHERE run_id = ? ORDER BY ordinal ASC",
        )
        .bind(run_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list chunks for run")?;

        rows.into_iter().map(chunk_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> ReviewStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = ReviewStore::new(pool);
        store.initialize().await.expect("schema should init");
        store
    }

    fn sample_chunk(ordinal: i64, heading: &str) -> ReviewChunk {
        ReviewChunk {
            id: String::new(),
            run_id: String::new(),
            document_id: String::new(),
            chunk_id: format!("chk_{ordinal}"),
            schema_version: "v1".to_string(),
            ordinal,
            heading: heading.to_string(),
            body: "body text".to_string(),
            start_offset: Some(0),
            end_offset: Some(9),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn persist_is_idempotent_on_retry() {
        let store = setup().await;
        let chunks = vec![sample_chunk(1, "Clause 1"), sample_chunk(2, "Clause 2")];

        store.persist_chunks_for_run("run-1", "doc-1", &chunks).await.unwrap();
        store.persist_chunks_for_run("run-1", "doc-1", &chunks).await.unwrap();

        let stored = store.get_chunks_for_run("run-1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].heading, "Clause 1");
    }
}
