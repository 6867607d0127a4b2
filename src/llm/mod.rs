//! LLM Client & Validator (component C).
//!
//! `LlmClient` is the single entry point: it picks a provider once at
//! construction (mirroring this codebase's `LlmManager`-style "simple
//! manager, routing elsewhere" split, minus the OAuth/multi-model routing
//! this spec doesn't need) and normalizes whatever the provider returns into
//! internal [`LlmFinding`]s, applying evidence-span gating exactly as
//! `apps/review/llm/provider.py::generate_llm_findings_for_clauses` does.

mod mock;
mod openai;
pub mod schema;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{Config, LlmProviderKind};
use crate::error::LlmError;
use crate::model::{Clause, EvidenceSpan, FindingSource, RawFinding, Severity};

pub use mock::MockProvider;
pub use openai::OpenAiProvider;
use schema::ValidatedFinding;

/// A finding produced by the LLM stage, normalized into internal shape but
/// not yet persisted (persistence fills in `document_id`/`run_id`/`chunk_id`).
#[derive(Debug, Clone)]
pub struct LlmFinding {
    pub id: String,
    pub clause_id: String,
    pub severity: Severity,
    pub summary: String,
    pub explanation: String,
    pub evidence_text: String,
    pub evidence_span: EvidenceSpan,
    pub confidence: f64,
    pub model: String,
    pub prompt_rev: String,
    pub source: FindingSource,
}

impl From<LlmFinding> for RawFinding {
    fn from(f: LlmFinding) -> Self {
        RawFinding {
            id: f.id,
            clause_id: f.clause_id.clone(),
            chunk_id: f.clause_id,
            rule_code: None,
            severity: f.severity,
            summary: f.summary,
            explanation: Some(f.explanation),
            recommendation: None,
            evidence_text: f.evidence_text,
            evidence_span: f.evidence_span,
            source: f.source,
            confidence: Some(f.confidence),
            model: Some(f.model),
            prompt_rev: Some(f.prompt_rev),
        }
    }
}

pub struct LlmOutcome {
    pub findings: Vec<ValidatedFinding>,
    pub model: String,
    pub token_usage: serde_json::Value,
}

/// Capability trait for pluggable providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, clauses: &[Clause]) -> Result<LlmOutcome, LlmError>;
}

/// Result of a full LLM stage run: normalized findings, the model that
/// produced them, and raw token usage to fold into the run's stats.
pub struct LlmStageResult {
    pub findings: Vec<LlmFinding>,
    pub model: String,
    pub token_usage: serde_json::Value,
}

pub struct LlmClient {
    provider: Box<dyn LlmProvider>,
    prompt_rev: String,
}

impl LlmClient {
    /// Select a provider per spec.md §4.C: `mock` always uses the mock
    /// provider; `openai` uses the real provider when an API key is
    /// configured and silently falls back to mock otherwise.
    pub fn from_config(config: &Config) -> Self {
        let provider: Box<dyn LlmProvider> = match config.llm_provider {
            LlmProviderKind::Mock => Box::new(MockProvider),
            LlmProviderKind::OpenAi => match &config.openai_api_key {
                Some(key) => Box::new(OpenAiProvider::new(key.clone(), config.openai_model.clone())),
                None => {
                    tracing::warn!("LLM_PROVIDER=openai but no OPENAI_API_KEY set, falling back to mock");
                    Box::new(MockProvider)
                }
            },
        };

        Self {
            provider,
            prompt_rev: config.prompt_rev.clone(),
        }
    }

    /// Build a client around an explicit provider, bypassing config-driven
    /// selection. Used by pipeline tests to simulate provider failures
    /// (timeouts, transport errors) without a real network call.
    #[cfg(test)]
    pub(crate) fn with_provider(provider: Box<dyn LlmProvider>, prompt_rev: String) -> Self {
        Self { provider, prompt_rev }
    }

    /// Run the LLM stage over a set of clauses, returning normalized
    /// findings. Evidence-span gating and unknown-clause-id discarding
    /// happen here, not inside the provider.
    pub async fn generate_findings(&self, clauses: &[Clause]) -> Result<LlmStageResult, LlmError> {
        let outcome = self.provider.generate(clauses).await?;

        let by_clause_id: std::collections::HashMap<&str, &Clause> =
            clauses.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut findings = Vec::with_capacity(outcome.findings.len());
        for item in outcome.findings {
            let Some(clause) = by_clause_id.get(item.clause_id.as_str()) else {
                continue;
            };

            if item.evidence_text.trim().is_empty() {
                continue;
            }

            if !schema::span_in_clause_body(item.evidence_start, item.evidence_end, &clause.body) {
                return Err(LlmError::Validation(format!(
                    "evidence_span out of bounds for clause_id={}",
                    item.clause_id
                )));
            }

            let severity = Severity::parse(&item.severity).unwrap_or(Severity::Medium);

            findings.push(LlmFinding {
                id: Uuid::new_v4().to_string(),
                clause_id: item.clause_id,
                severity,
                summary: item.summary,
                explanation: item.explanation,
                evidence_text: item.evidence_text,
                evidence_span: EvidenceSpan {
                    start: item.evidence_start,
                    end: item.evidence_end,
                    pointer: None,
                },
                confidence: item.confidence,
                model: outcome.model.clone(),
                prompt_rev: self.prompt_rev.clone(),
                source: FindingSource::Llm,
            });
        }

        Ok(LlmStageResult {
            findings,
            model: outcome.model,
            token_usage: outcome.token_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(id: &str, heading: &str, body: &str) -> Clause {
        Clause { id: id.to_string(), heading: heading.to_string(), body: body.to_string() }
    }

    #[tokio::test]
    async fn mock_client_produces_gated_findings() {
        let config = Config {
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
        };

        let client = LlmClient::from_config(&config);
        let clauses = vec![clause("c1", "Termination", "Either party may terminate with 15 days notice.")];
        let result = client.generate_findings(&clauses).await.unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].prompt_rev, "v1");
        assert_eq!(result.model, "mock");
    }

    #[tokio::test]
    async fn unknown_clause_id_is_discarded() {
        struct StubProvider;

        #[async_trait]
        impl LlmProvider for StubProvider {
            async fn generate(&self, _clauses: &[Clause]) -> Result<LlmOutcome, LlmError> {
                Ok(LlmOutcome {
                    findings: vec![ValidatedFinding {
                        clause_id: "ghost".to_string(),
                        severity: "low".to_string(),
                        summary: "s".to_string(),
                        explanation: "e".to_string(),
                        evidence_text: "ev".to_string(),
                        evidence_start: 0,
                        evidence_end: 2,
                        confidence: 0.5,
                    }],
                    model: "stub".to_string(),
                    token_usage: serde_json::json!({}),
                })
            }
        }

        let client = LlmClient { provider: Box::new(StubProvider), prompt_rev: "v1".to_string() };
        let clauses = vec![clause("c1", "Heading", "Body text")];
        let result = client.generate_findings(&clauses).await.unwrap();
        assert!(result.findings.is_empty());
    }
}
