//! Pipeline Executor (component G): drives one `process(run_id)` attempt
//! through preprocess → rules → llm → persist, enforcing the failure-
//! containment boundary from spec.md §4.G/§7 — an LLM failure downgrades
//! the run to `partial` with rule-only findings; anything else marks the
//! run `failed` and is returned as `Err` so the worker loop can retry.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::cache::{CachedResult, ResultCache, build_pipeline_cache_key};
use crate::chunk::chunk_document;
use crate::config::Config;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::model::{Clause, RawFinding, ReviewChunk, RunStatus, Stage};
use crate::rules::run_rules;
use crate::store::ReviewStore;

pub struct PipelineExecutor {
    store: ReviewStore,
    cache: ResultCache,
    llm: LlmClient,
    config: Arc<Config>,
}

/// Merged pipeline output, whichever path (cache hit / rules-only / full)
/// produced it, ready to persist.
struct StageOutput {
    chunks: Vec<ReviewChunk>,
    findings: Vec<RawFinding>,
    llm_model: Option<String>,
    token_usage: Value,
    llm_failed: Option<String>,
    cache_hit: bool,
}

impl PipelineExecutor {
    pub fn new(store: ReviewStore, cache: ResultCache, llm: LlmClient, config: Arc<Config>) -> Self {
        Self { store, cache, llm, config }
    }

    /// Run exactly one attempt at processing `run_id`.
    pub async fn process(&self, run_id: &str) -> Result<()> {
        let run = self.store.get_run(run_id).await?;
        let document = self.store.get_document(&run.document_id).await?;

        let cache_key = build_pipeline_cache_key(
            document.source_type.as_str(),
            &document.text,
            &document.ingestion_metadata,
            &self.config.prompt_rev,
            &self.config.chunk_schema_version,
        );
        self.store.mark_run_started(run_id, &cache_key).await?;

        let result = self.run_stages(run_id, &document, &cache_key).await;

        match result {
            Ok(output) => {
                self.store.set_run_stage(run_id, Stage::Persist).await?;
                let persist_started = Instant::now();
                let clauses = clauses_from_chunks(&output.chunks);
                self.store.persist_chunks_for_run(run_id, &document.id, &output.chunks).await?;
                self.store
                    .persist_findings_for_run(run_id, &document.id, &clauses, &output.findings)
                    .await?;
                let persist_ms = persist_started.elapsed().as_millis() as i64;

                let mut stage_timings = self.existing_timings(run_id).await;
                stage_timings["persist_ms"] = json!(persist_ms);

                let status = if output.llm_failed.is_some() { RunStatus::Partial } else { RunStatus::Succeeded };
                self.store
                    .finish_run(run_id, status, output.llm_failed.as_deref(), &stage_timings, &output.token_usage)
                    .await?;

                if !output.cache_hit && output.llm_failed.is_none() {
                    self.cache
                        .put(
                            cache_key,
                            CachedResult {
                                chunks: output.chunks,
                                findings: output.findings,
                                llm_model: output.llm_model,
                                prompt_rev: self.config.prompt_rev.clone(),
                                token_usage: output.token_usage,
                            },
                        )
                        .await;
                }

                Ok(())
            }
            Err(error) => {
                let stage_timings = self.existing_timings(run_id).await;
                self.store
                    .finish_run(run_id, RunStatus::Failed, Some(&error.to_string()), &stage_timings, &json!({}))
                    .await?;
                Err(error)
            }
        }
    }

    async fn existing_timings(&self, run_id: &str) -> Value {
        self.store
            .get_run(run_id)
            .await
            .map(|r| r.stage_timings)
            .unwrap_or_else(|_| json!({}))
    }

    /// Cache consult, then (on miss) preprocess → rules → llm. Only store
    /// errors outside the LLM call propagate as `Err`; an LLM failure is
    /// captured into `StageOutput::llm_failed` instead.
    async fn run_stages(
        &self,
        run_id: &str,
        document: &crate::model::Document,
        cache_key: &str,
    ) -> Result<StageOutput> {
        let mut stage_timings = json!({});

        let lookup_started = Instant::now();
        let cached = self.cache.get(cache_key).await;
        stage_timings["cache_lookup_ms"] = json!(lookup_started.elapsed().as_millis() as i64);
        self.persist_partial_timings(run_id, &stage_timings).await?;

        if let Some(cached) = cached {
            self.store.record_cache_hit(run_id).await?;
            return Ok(StageOutput {
                chunks: cached.chunks.clone(),
                findings: cached.findings.clone(),
                llm_model: cached.llm_model.clone(),
                token_usage: cached.token_usage.clone(),
                llm_failed: None,
                cache_hit: true,
            });
        }
        self.store.record_cache_miss(run_id).await?;

        self.store.set_run_stage(run_id, Stage::Preprocess).await?;
        let preprocess_started = Instant::now();
        let chunks = chunk_document(&document.text, document.source_type.as_str(), &document.ingestion_metadata);
        stage_timings["preprocess_ms"] = json!(preprocess_started.elapsed().as_millis() as i64);
        self.persist_partial_timings(run_id, &stage_timings).await?;

        let clauses = clauses_from_chunks(&chunks);

        self.store.set_run_stage(run_id, Stage::Rules).await?;
        let rules_started = Instant::now();
        let rule_findings: Vec<RawFinding> =
            run_rules(&clauses, &self.config.preferred_jurisdiction).into_iter().map(RawFinding::from).collect();
        stage_timings["rules_ms"] = json!(rules_started.elapsed().as_millis() as i64);
        self.persist_partial_timings(run_id, &stage_timings).await?;

        self.store.set_run_stage(run_id, Stage::Llm).await?;
        let llm_started = Instant::now();
        let llm_result = self.llm.generate_findings(&clauses).await;
        stage_timings["llm_ms"] = json!(llm_started.elapsed().as_millis() as i64);
        self.persist_partial_timings(run_id, &stage_timings).await?;

        match llm_result {
            Ok(stage_result) => {
                let mut findings = rule_findings;
                findings.extend(stage_result.findings.into_iter().map(RawFinding::from));
                attach_evidence_pointers(&mut findings, &chunks);

                Ok(StageOutput {
                    chunks,
                    findings,
                    llm_model: Some(stage_result.model),
                    token_usage: stage_result.token_usage,
                    llm_failed: None,
                    cache_hit: false,
                })
            }
            Err(llm_error) => {
                let mut findings = rule_findings;
                attach_evidence_pointers(&mut findings, &chunks);
                Ok(StageOutput {
                    chunks,
                    findings,
                    llm_model: None,
                    token_usage: json!({}),
                    llm_failed: Some(llm_error.to_string()),
                    cache_hit: false,
                })
            }
        }
    }

    /// Write timings-so-far onto the run row so a worker crash mid-execution
    /// still leaves an inspectable partial trail.
    async fn persist_partial_timings(&self, run_id: &str, stage_timings: &Value) -> Result<()> {
        self.store.set_run_stage_timings(run_id, stage_timings).await
    }
}

fn clauses_from_chunks(chunks: &[ReviewChunk]) -> Vec<Clause> {
    chunks.iter().map(|c| Clause { id: c.chunk_id.clone(), heading: c.heading.clone(), body: c.body.clone() }).collect()
}

/// Attach each finding's originating chunk's `evidence_pointer` (if any)
/// onto its `evidence_span.pointer`.
fn attach_evidence_pointers(findings: &mut [RawFinding], chunks: &[ReviewChunk]) {
    let pointer_by_chunk_id: std::collections::HashMap<&str, Value> = chunks
        .iter()
        .filter_map(|c| c.metadata.get("evidence_pointer").map(|p| (c.chunk_id.as_str(), p.clone())))
        .collect();

    for finding in findings.iter_mut() {
        if finding.evidence_span.pointer.is_some() {
            continue;
        }
        if let Some(pointer_value) = pointer_by_chunk_id.get(finding.chunk_id.as_str()) {
            if let Ok(pointer) = serde_json::from_value(pointer_value.clone()) {
                finding.evidence_span.pointer = Some(pointer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::LlmProviderKind;
    use crate::llm::LlmClient;
    use crate::model::{Document, SourceType};
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> Config {
        Config {
            sqlite_path: "/tmp/x.db".into(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            max_concurrent_runs: 10,
            rate_limit_per_minute: 20,
            enable_pipeline_cache: true,
            cache_ttl_seconds: 3600,
            findings_default_page_size: 20,
            findings_max_page_size: 100,
            llm_provider: LlmProviderKind::Mock,
            prompt_rev: "v1".to_string(),
            chunk_schema_version: "v1".to_string(),
            preferred_jurisdiction: "California".to_string(),
            worker_concurrency: 4,
            max_attempts: 3,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
        }
    }

    async fn setup() -> (ReviewStore, PipelineExecutor) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = ReviewStore::new(pool);
        store.initialize().await.expect("schema should init");

        let config = Arc::new(test_config());
        let cache = ResultCache::new(config.enable_pipeline_cache, config.cache_ttl_seconds);
        let llm = LlmClient::from_config(&config);
        let executor = PipelineExecutor::new(store.clone(), cache, llm, config);
        (store, executor)
    }

    #[tokio::test]
    async fn full_run_produces_rule_and_llm_findings() {
        let (store, executor) = setup().await;
        store
            .create_document(&Document {
                id: "doc-1".to_string(),
                title: "t".to_string(),
                text: "1. Termination\nEither party may terminate this agreement with 15 days notice.\n\n\
                       2. Indemnity\nVendor agrees to indemnify and hold harmless the customer."
                    .to_string(),
                source_type: SourceType::Text,
                ingestion_metadata: serde_json::Value::Null,
                created_at: String::new(),
            })
            .await
            .unwrap();
        store.create_run("run-1", "doc-1", None, "fp-1").await.unwrap();

        executor.process("run-1").await.unwrap();

        let run = store.get_run("run-1").await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.current_stage.is_none());
        assert!(run.completed_at.is_some());

        let findings = store.list_findings_for_run("run-1").await.unwrap();
        assert!(findings.iter().any(|f| f.rule_code.as_deref() == Some("TERM_NOTICE_MIN")));
        assert!(findings.iter().any(|f| f.rule_code.as_deref() == Some("INDEMNITY_PRESENT")));
        for f in &findings {
            assert!(f.chunk_id.starts_with("chk_"));
            assert!(f.evidence_span.start < f.evidence_span.end);
        }
    }

    #[tokio::test]
    async fn retry_is_idempotent_on_chunk_and_finding_counts() {
        let (store, executor) = setup().await;
        store
            .create_document(&Document {
                id: "doc-1".to_string(),
                title: "t".to_string(),
                text: "1. Termination\nEither party may terminate with 15 days notice.".to_string(),
                source_type: SourceType::Text,
                ingestion_metadata: serde_json::Value::Null,
                created_at: String::new(),
            })
            .await
            .unwrap();
        store.create_run("run-1", "doc-1", None, "fp-1").await.unwrap();

        executor.process("run-1").await.unwrap();
        let first_findings = store.list_findings_for_run("run-1").await.unwrap().len();
        let first_chunks = store.get_chunks_for_run("run-1").await.unwrap().len();

        executor.process("run-1").await.unwrap();
        let second_findings = store.list_findings_for_run("run-1").await.unwrap().len();
        let second_chunks = store.get_chunks_for_run("run-1").await.unwrap().len();

        assert_eq!(first_findings, second_findings);
        assert_eq!(first_chunks, second_chunks);
    }

    #[tokio::test]
    async fn second_run_on_unchanged_document_hits_cache() {
        let (store, executor) = setup().await;
        store
            .create_document(&Document {
                id: "doc-1".to_string(),
                title: "t".to_string(),
                text: "1. Termination\nEither party may terminate with 15 days notice.".to_string(),
                source_type: SourceType::Text,
                ingestion_metadata: serde_json::Value::Null,
                created_at: String::new(),
            })
            .await
            .unwrap();

        store.create_run("run-1", "doc-1", None, "fp-1").await.unwrap();
        executor.process("run-1").await.unwrap();
        let run1 = store.get_run("run-1").await.unwrap();
        assert_eq!(run1.cache_misses, 1);
        assert_eq!(run1.cache_hits, 0);

        store.create_run("run-2", "doc-1", None, "fp-1").await.unwrap();
        executor.process("run-2").await.unwrap();
        let run2 = store.get_run("run-2").await.unwrap();
        assert_eq!(run2.cache_hits, 1);
        assert_eq!(run2.cache_misses, 0);
    }

    struct TimeoutProvider;

    #[async_trait::async_trait]
    impl crate::llm::LlmProvider for TimeoutProvider {
        async fn generate(&self, _clauses: &[Clause]) -> std::result::Result<crate::llm::LlmOutcome, crate::error::LlmError> {
            Err(crate::error::LlmError::Timeout("upstream timeout".to_string()))
        }
    }

    #[tokio::test]
    async fn llm_timeout_downgrades_run_to_partial_with_rule_only_findings() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = ReviewStore::new(pool);
        store.initialize().await.expect("schema should init");
        store
            .create_document(&Document {
                id: "doc-1".to_string(),
                title: "t".to_string(),
                text: "1. Termination\nEither party may terminate with 15 days notice.".to_string(),
                source_type: SourceType::Text,
                ingestion_metadata: serde_json::Value::Null,
                created_at: String::new(),
            })
            .await
            .unwrap();
        store.create_run("run-1", "doc-1", None, "fp-1").await.unwrap();

        let config = Arc::new(test_config());
        let cache = ResultCache::new(config.enable_pipeline_cache, config.cache_ttl_seconds);
        let llm = LlmClient::with_provider(Box::new(TimeoutProvider), config.prompt_rev.clone());
        let executor = PipelineExecutor::new(store.clone(), cache, llm, config);

        executor.process("run-1").await.unwrap();

        let run = store.get_run("run-1").await.unwrap();
        assert_eq!(run.status, RunStatus::Partial);
        assert!(run.current_stage.is_none());
        assert!(run.error.as_deref().unwrap_or_default().to_lowercase().contains("timeout"));
        assert!(run.stage_timings.get("llm_ms").is_some());
        assert!(run.stage_timings.get("persist_ms").is_some());
        assert_eq!(run.cache_hits, 0);
        assert_eq!(run.cache_misses, 1);

        let findings = store.list_findings_for_run("run-1").await.unwrap();
        assert!(!findings.is_empty());
        assert!(findings.iter().all(|f| f.source == crate::model::FindingSource::Rule));
    }

    #[tokio::test]
    async fn llm_timeout_does_not_populate_cache() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = ReviewStore::new(pool);
        store.initialize().await.expect("schema should init");
        let text = "1. Termination\nEither party may terminate with 15 days notice.".to_string();
        store
            .create_document(&Document {
                id: "doc-1".to_string(),
                title: "t".to_string(),
                text: text.clone(),
                source_type: SourceType::Text,
                ingestion_metadata: serde_json::Value::Null,
                created_at: String::new(),
            })
            .await
            .unwrap();
        store.create_run("run-1", "doc-1", None, "fp-1").await.unwrap();

        let config = Arc::new(test_config());
        let cache = ResultCache::new(config.enable_pipeline_cache, config.cache_ttl_seconds);
        let cache_key = build_pipeline_cache_key(
            "text",
            &text,
            &serde_json::Value::Null,
            &config.prompt_rev,
            &config.chunk_schema_version,
        );
        let llm = LlmClient::with_provider(Box::new(TimeoutProvider), config.prompt_rev.clone());
        let executor = PipelineExecutor::new(store.clone(), cache.clone(), llm, config);

        executor.process("run-1").await.unwrap();
        assert!(cache.get(&cache_key).await.is_none());
    }
}
