use anyhow::Context as _;
use sqlx::Row as _;

use crate::error::{Error, Result};
use crate::model::{ReviewRun, RunStatus, Stage};

use super::ReviewStore;

fn run_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ReviewRun> {
    let status_value: String = row.try_get("status").context("failed to read run status")?;
    let status = RunStatus::parse(&status_value)
        .with_context(|| format!("invalid run status in database: {status_value}"))?;

    let stage_value: Option<String> = row.try_get("current_stage").ok();
    let current_stage = stage_value.as_deref().and_then(Stage::parse);

    let token_usage_value: String = row.try_get("token_usage").unwrap_or_else(|_| "{}".to_string());
    let stage_timings_value: String = row.try_get("stage_timings").unwrap_or_else(|_| "{}".to_string());

    Ok(ReviewRun {
        id: row.try_get("id").context("failed to read run id")?,
        document_id: row.try_get("document_id").context("failed to read run document_id")?,
        idempotency_key: row.try_get("idempotency_key").ok(),
        request_fingerprint: row
            .try_get("request_fingerprint")
            .context("failed to read run request_fingerprint")?,
        status,
        current_stage,
        error: row.try_get("error").ok(),
        llm_model: row.try_get("llm_model").ok(),
        prompt_rev: row.try_get("prompt_rev").ok(),
        cache_key: row.try_get("cache_key").ok(),
        cache_hits: row.try_get("cache_hits").unwrap_or(0),
        cache_misses: row.try_get("cache_misses").unwrap_or(0),
        token_usage: serde_json::from_str(&token_usage_value).unwrap_or_else(|_| serde_json::json!({})),
        stage_timings: serde_json::from_str(&stage_timings_value).unwrap_or_else(|_| serde_json::json!({})),
        started_at: row
            .try_get::<Option<chrono::NaiveDateTime>, _>("started_at")
            .ok()
            .flatten()
            .map(|v| v.and_utc().to_rfc3339()),
        completed_at: row
            .try_get::<Option<chrono::NaiveDateTime>, _>("completed_at")
            .ok()
            .flatten()
            .map(|v| v.and_utc().to_rfc3339()),
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .map(|v| v.and_utc().to_rfc3339())
            .context("failed to read run created_at")?,
    })
}

const RUN_COLUMNS: &str = "id, document_id, idempotency_key, request_fingerprint, status, \
    current_stage, error, llm_model, prompt_rev, cache_key, cache_hits, cache_misses, \
    token_usage, stage_timings, started_at, completed_at, created_at";

impl ReviewStore {
    /// Create a new run in `queued` status.
    pub async fn create_run(
        &self,
        run_id: &str,
        document_id: &str,
        idempotency_key: Option<&str>,
        request_fingerprint: &str,
    ) -> Result<ReviewRun> {
        sqlx::query(
            "INSERT INTO review_runs (id, document_id, idempotency_key, request_fingerprint, status) \
             VALUES (?, ?, ?, ?, 'queued')",
        )
        .bind(run_id)
        .bind(document_id)
        .bind(idempotency_key)
        .bind(request_fingerprint)
        .execute(self.pool())
        .await
        .context("failed to insert review run")?;

        self.get_run(run_id).await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<ReviewRun> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM review_runs WHERE id = ?"))
            .bind(run_id)
            .fetch_optional(self.pool())
            .await
            .context("failed to fetch review run")?;

        match row {
            Some(row) => run_from_row(row),
            None => Err(Error::RunNotFound(run_id.to_string())),
        }
    }

    /// Most recent run for `(document_id, idempotency_key)`, used by intake
    /// to detect a reusable or expired duplicate.
    pub async fn find_run_by_idempotency_key(
        &self,
        document_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<ReviewRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM review_runs \
             WHERE document_id = ? AND idempotency_key = ? \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(document_id)
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await
        .context("failed to look up run by idempotency key")?;

        row.map(run_from_row).transpose()
    }

    /// Most recent run for a document, used as the `GET .../findings`
    /// default run when `run_id` is not supplied.
    pub async fn find_latest_run_for_document(&self, document_id: &str) -> Result<Option<ReviewRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM review_runs WHERE document_id = ? ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to look up latest run for document")?;

        row.map(run_from_row).transpose()
    }

    /// Count of runs currently occupying the admission concurrency cap
    /// (`status IN (queued, running)`).
    pub async fn count_active_runs(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM review_runs WHERE status IN ('queued', 'running')")
            .fetch_one(self.pool())
            .await
            .context("failed to count active runs")?;
        row.try_get("n").context("failed to read active run count")
    }

    /// Count of runs in the last 60 seconds sharing `request_fingerprint`.
    pub async fn count_recent_runs_for_fingerprint(&self, request_fingerprint: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM review_runs \
             WHERE request_fingerprint = ? AND created_at >= datetime('now', '-60 seconds')",
        )
        .bind(request_fingerprint)
        .fetch_one(self.pool())
        .await
        .context("failed to count recent runs for fingerprint")?;
        row.try_get("n").context("failed to read recent run count")
    }

    /// Mark a run `failed` before it was ever dispatched.
    pub async fn mark_run_enqueue_failed(&self, run_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE review_runs SET status = 'failed', error = ?, completed_at = CURRENT_TIMESTAMP \
             WHERE id = ?",
        )
        .bind(error)
        .bind(run_id)
        .execute(self.pool())
        .await
        .context("failed to mark run enqueue-failed")?;
        Ok(())
    }

    /// Transition a run into `running`, stamping `started_at` if unset and
    /// clearing any stale `error` from a prior attempt.
    pub async fn mark_run_started(&self, run_id: &str, cache_key: &str) -> Result<()> {
        sqlx::query(
            "UPDATE review_runs SET status = 'running', current_stage = 'preprocess', error = NULL, \
             cache_key = ?, started_at = COALESCE(started_at, CURRENT_TIMESTAMP) WHERE id = ?",
        )
        .bind(cache_key)
        .bind(run_id)
        .execute(self.pool())
        .await
        .context("failed to mark run started")?;
        Ok(())
    }

    /// Write timings accumulated so far, independent of the terminal write
    /// in `finish_run` — lets a crashed worker leave an inspectable partial
    /// trail.
    pub async fn set_run_stage_timings(&self, run_id: &str, stage_timings: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE review_runs SET stage_timings = ? WHERE id = ?")
            .bind(stage_timings.to_string())
            .bind(run_id)
            .execute(self.pool())
            .await
            .context("failed to update run stage timings")?;
        Ok(())
    }

    pub async fn set_run_stage(&self, run_id: &str, stage: Stage) -> Result<()> {
        sqlx::query("UPDATE review_runs SET current_stage = ? WHERE id = ?")
            .bind(stage.as_str())
            .bind(run_id)
            .execute(self.pool())
            .await
            .context("failed to set run stage")?;
        Ok(())
    }

    pub async fn record_cache_hit(&self, run_id: &str) -> Result<()> {
        sqlx::query("UPDATE review_runs SET cache_hits = 1 WHERE id = ?")
            .bind(run_id)
            .execute(self.pool())
            .await
            .context("failed to record cache hit")?;
        Ok(())
    }

    pub async fn record_cache_miss(&self, run_id: &str) -> Result<()> {
        sqlx::query("UPDATE review_runs SET cache_misses = 1 WHERE id = ?")
            .bind(run_id)
            .execute(self.pool())
            .await
            .context("failed to record cache miss")?;
        Ok(())
    }

    /// Terminal transition: `succeeded`/`partial`/`failed`, clearing
    /// `current_stage`, stamping `completed_at`, and writing final
    /// timings/usage/error.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
        stage_timings: &serde_json::Value,
        token_usage: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE review_runs SET status = ?, current_stage = NULL, error = ?, \
             stage_timings = ?, token_usage = ?, completed_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(stage_timings.to_string())
        .bind(token_usage.to_string())
        .bind(run_id)
        .execute(self.pool())
        .await
        .context("failed to finish run")?;
        Ok(())
    }
}
