//! Core data model: documents, review runs, chunks, and findings.
//!
//! Mirrors spec.md §3. Enums follow this codebase's existing convention
//! (see the task store) of a closed Rust enum with `as_str`/`parse` rather
//! than relying on `sqlx`'s derive machinery, since every enum here is
//! persisted as a plain SQLite TEXT column.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a document's raw bytes were ingested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Text,
    Pdf,
    Spreadsheet,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::Pdf => "pdf",
            SourceType::Spreadsheet => "spreadsheet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(SourceType::Text),
            "pdf" => Some(SourceType::Pdf),
            "spreadsheet" => Some(SourceType::Spreadsheet),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded document. Ingestion (PDF/spreadsheet extraction) happens
/// before a `Document` is constructed; this type holds the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub text: String,
    pub source_type: SourceType,
    pub ingestion_metadata: Value,
    pub created_at: String,
}

/// Lifecycle status of a `ReviewRun`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "partial" => Some(RunStatus::Partial),
            _ => None,
        }
    }

    /// Terminal states have no further stage transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Partial
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current pipeline stage of a running `ReviewRun`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Rules,
    Llm,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Rules => "rules",
            Stage::Llm => "llm",
            Stage::Persist => "persist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "preprocess" => Some(Stage::Preprocess),
            "rules" => Some(Stage::Rules),
            "llm" => Some(Stage::Llm),
            "persist" => Some(Stage::Persist),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The scheduling unit: one attempt (or re-attempt) at reviewing a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRun {
    pub id: String,
    pub document_id: String,
    pub idempotency_key: Option<String>,
    pub request_fingerprint: String,
    pub status: RunStatus,
    pub current_stage: Option<Stage>,
    pub error: Option<String>,
    pub llm_model: Option<String>,
    pub prompt_rev: Option<String>,
    pub cache_key: Option<String>,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub token_usage: Value,
    pub stage_timings: Value,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// A severity rating shared by rule and LLM findings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a finding came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    Rule,
    Llm,
    Unknown,
}

impl FindingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingSource::Rule => "rule",
            FindingSource::Llm => "llm",
            FindingSource::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rule" => Some(FindingSource::Rule),
            "llm" => Some(FindingSource::Llm),
            "unknown" => Some(FindingSource::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for FindingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `[start, end)` range into a clause body, or an abstract pointer into a
/// spreadsheet for chunks that have no character offsets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceSpan {
    pub start: i64,
    pub end: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<EvidencePointer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidencePointer {
    Spreadsheet {
        sheet: String,
        row_start: i64,
        row_end: i64,
    },
}

/// One persisted chunk, deterministically produced by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewChunk {
    pub id: String,
    pub run_id: String,
    pub document_id: String,
    pub chunk_id: String,
    pub schema_version: String,
    pub ordinal: i64,
    pub heading: String,
    pub body: String,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    pub metadata: Value,
}

/// A single annotated observation about a clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub document_id: String,
    pub run_id: Option<String>,
    pub clause_id: String,
    pub chunk_id: String,
    pub clause_heading: Option<String>,
    pub clause_body: Option<String>,
    pub summary: String,
    pub explanation: Option<String>,
    pub recommendation: Option<String>,
    pub severity: Severity,
    pub evidence: String,
    pub evidence_span: EvidenceSpan,
    pub source: FindingSource,
    pub rule_code: Option<String>,
    pub model: Option<String>,
    pub confidence: Option<f64>,
    pub prompt_rev: Option<String>,
    pub created_at: String,
}

/// A clause handed to the rule engine and LLM client: the chunk projected
/// down to `{id, heading, body}`. `id` is the chunk's
/// `chunk_id`, so a rule or LLM finding's `clause_id` doubles as the
/// `chunk_id` it should be persisted against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub id: String,
    pub heading: String,
    pub body: String,
}

/// A finding before chunk-pointer attachment and persistence: the common
/// shape both [`crate::rules::RuleFinding`] and [`crate::llm::LlmFinding`]
/// are converted into so the pipeline can merge, cache, and persist them
/// uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    pub id: String,
    pub clause_id: String,
    pub chunk_id: String,
    pub rule_code: Option<String>,
    pub severity: Severity,
    pub summary: String,
    pub explanation: Option<String>,
    pub recommendation: Option<String>,
    pub evidence_text: String,
    pub evidence_span: EvidenceSpan,
    pub source: FindingSource,
    pub confidence: Option<f64>,
    pub model: Option<String>,
    pub prompt_rev: Option<String>,
}
