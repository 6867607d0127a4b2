//! Deterministic mock provider.
//!
//! Used directly when `LLM_PROVIDER=mock`, and as the silent fallback when
//! `openai` is configured without an API key — same as the original
//! Python's "optional: if no key, silently fall back to mock" behavior.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::model::Clause;

use super::{LlmOutcome, LlmProvider};
use super::schema::ValidatedFinding;

pub struct MockProvider;

fn mock_findings_for_clauses(clauses: &[Clause]) -> Vec<ValidatedFinding> {
    clauses
        .iter()
        .map(|clause| {
            let heading = clause.heading.trim();
            let body = clause.body.trim();
            let evidence_text = if !body.is_empty() {
                truncate_chars(body, 200)
            } else if !heading.is_empty() {
                truncate_chars(heading, 200)
            } else {
                "Evidence unavailable.".to_string()
            };
            let evidence_end = evidence_text.len().max(1) as i64;

            let summary = if heading.is_empty() {
                "Mock review: potential issues flagged for review.".to_string()
            } else {
                format!("Mock review ({heading}): potential issues flagged for review.")
            };

            ValidatedFinding {
                clause_id: clause.id.clone(),
                severity: "medium".to_string(),
                summary,
                explanation: "Mock mode is enabled, so this finding was generated without an LLM call."
                    .to_string(),
                evidence_text,
                evidence_start: 0,
                evidence_end,
                confidence: 0.65,
            }
        })
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, clauses: &[Clause]) -> Result<LlmOutcome, LlmError> {
        Ok(LlmOutcome {
            findings: mock_findings_for_clauses(clauses),
            model: "mock".to_string(),
            token_usage: serde_json::json!({}),
        })
    }
}
