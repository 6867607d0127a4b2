//! OpenAI chat-completions provider.
//!
//! Builds a JSON-schema-constrained request the same way
//! `apps/review/llm/provider.py::call_llm_for_clauses` does: a system
//! preamble, a user message carrying `{"clauses": [...]}`, and
//! `response_format: {type: "json_schema", ...}` pinned to the strict
//! findings schema. No `openai` crate in this stack — the request is a
//! plain `reqwest` JSON POST, same as every other external call here.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::model::Clause;

use super::schema::validate_llm_response;
use super::{LlmOutcome, LlmProvider};

const SYSTEM_PROMPT: &str = "You are a contract review assistant. Given a list of \
clauses from a legal document, identify potential risks and return a JSON object \
with a 'findings' array. Each finding must reference a clause_id from the input, \
quote the exact clause text that supports the finding in evidence_text, and give \
the evidence's character offsets in evidence_span relative to that clause's body.";

const FINDINGS_JSON_SCHEMA: &str = r#"{
  "type": "object",
  "additionalProperties": false,
  "required": ["findings"],
  "properties": {
    "findings": {
      "type": "array",
      "items": {
        "type": "object",
        "additionalProperties": false,
        "required": ["clause_id", "severity", "summary", "explanation", "evidence_text", "evidence_span", "confidence"],
        "properties": {
          "clause_id": {"type": "string", "minLength": 1},
          "severity": {"type": "string", "enum": ["low", "medium", "high"]},
          "summary": {"type": "string", "minLength": 1},
          "explanation": {"type": "string", "minLength": 1},
          "evidence_text": {"type": "string", "minLength": 1},
          "evidence_span": {
            "type": "object",
            "additionalProperties": false,
            "required": ["start", "end"],
            "properties": {
              "start": {"type": "integer", "minimum": 0},
              "end": {"type": "integer", "minimum": 1}
            }
          },
          "confidence": {"type": "number", "minimum": 0, "maximum": 1}
        }
      }
    }
  }
}"#;

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("failed to build HTTP client"),
            api_key,
            model,
        }
    }

    fn build_clauses_payload(clauses: &[Clause]) -> Value {
        json!({
            "clauses": clauses
                .iter()
                .map(|c| json!({ "id": c.id, "heading": c.heading, "body": c.body }))
                .collect::<Vec<_>>()
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, clauses: &[Clause]) -> Result<LlmOutcome, LlmError> {
        if clauses.is_empty() {
            return Ok(LlmOutcome {
                findings: Vec::new(),
                model: self.model.clone(),
                token_usage: json!({}),
            });
        }

        let schema: Value = serde_json::from_str(FINDINGS_JSON_SCHEMA)
            .expect("findings schema constant is valid JSON");

        let payload = Self::build_clauses_payload(clauses);
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Review the following clauses and return JSON with a 'findings' array.\n\n{}",
                        serde_json::to_string(&payload).unwrap_or_default()
                    ),
                },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "contract_clause_findings",
                    "strict": true,
                    "schema": schema,
                },
            },
        });

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!("openai responded {status}: {text}")));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to parse openai response: {e}")))?;

        let content = envelope
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::Transport("openai response missing message content".to_string()))?;

        let raw: Value = serde_json::from_str(content)
            .map_err(|e| LlmError::Validation(format!("openai content was not valid JSON: {e}")))?;

        let findings = validate_llm_response(&raw)?;

        let token_usage = envelope
            .get("usage")
            .cloned()
            .unwrap_or_else(|| json!({}));

        Ok(LlmOutcome {
            findings,
            model: self.model.clone(),
            token_usage,
        })
    }
}
