//! Review-Run Store (component E): SQLite-backed persistence for
//! documents, review runs, chunks, and findings.
//!
//! Follows this codebase's `TaskStore`/`MemoryStore` convention: a thin
//! struct wrapping a `SqlitePool`, an `initialize()` that issues
//! `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS` for every
//! table (no separate migration framework), and row-mapping functions
//! rather than `sqlx`'s derive machinery.

mod chunks;
mod documents;
mod findings;
mod runs;

pub use chunks::*;
pub use documents::*;
pub use findings::*;
pub use runs::*;

use anyhow::Context as _;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every table/index this store needs, idempotently.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                source_type TEXT NOT NULL,
                ingestion_metadata TEXT NOT NULL DEFAULT 'null',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create documents table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS review_runs (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                idempotency_key TEXT,
                request_fingerprint TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                current_stage TEXT,
                error TEXT,
                llm_model TEXT,
                prompt_rev TEXT,
                cache_key TEXT,
                cache_hits INTEGER NOT NULL DEFAULT 0,
                cache_misses INTEGER NOT NULL DEFAULT 0,
                token_usage TEXT NOT NULL DEFAULT '{}',
                stage_timings TEXT NOT NULL DEFAULT '{}',
                started_at TIMESTAMP,
                completed_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create review_runs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS review_chunks (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                schema_version TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                heading TEXT NOT NULL,
                body TEXT NOT NULL,
                start_offset INTEGER,
                end_offset INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (run_id) REFERENCES review_runs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create review_chunks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS findings (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                run_id TEXT,
                clause_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                clause_heading TEXT,
                clause_body TEXT,
                summary TEXT NOT NULL,
                explanation TEXT,
                recommendation TEXT,
                severity TEXT NOT NULL DEFAULT 'medium',
                evidence TEXT NOT NULL,
                evidence_span TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'unknown',
                rule_code TEXT,
                model TEXT,
                confidence REAL,
                prompt_rev TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (run_id) REFERENCES review_runs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create findings table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_runs_document ON review_runs(document_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_runs_idempotency ON review_runs(document_id, idempotency_key)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_runs_fingerprint ON review_runs(request_fingerprint, created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_chunks_run ON review_chunks(run_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_review_chunks_run_chunk ON review_chunks(run_id, chunk_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_run ON findings(run_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_document ON findings(document_id, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
