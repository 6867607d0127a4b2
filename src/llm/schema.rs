//! Strict validator for the LLM response wire shape.
//!
//! Deliberately hand-rolled rather than built on a generic JSON-schema
//! crate: the thing that matters here is exact control over "reject
//! additional properties" at every level, which a generic validator would
//! bury behind configuration. The wire shape validated here is never reused
//! as the internal `Finding` type (see [`crate::llm::LlmFinding`]).

use serde_json::Value;

use crate::error::LlmError;

/// One `findings[]` entry after strict validation, still in wire shape.
#[derive(Debug, Clone)]
pub struct ValidatedFinding {
    pub clause_id: String,
    pub severity: String,
    pub summary: String,
    pub explanation: String,
    pub evidence_text: String,
    pub evidence_start: i64,
    pub evidence_end: i64,
    pub confidence: f64,
}

const FINDING_KEYS: &[&str] = &[
    "clause_id",
    "severity",
    "summary",
    "explanation",
    "evidence_text",
    "evidence_span",
    "confidence",
];
const SPAN_KEYS: &[&str] = &["start", "end"];

fn fail(msg: impl Into<String>) -> LlmError {
    LlmError::Validation(msg.into())
}

fn require_non_empty_str(value: &Value, context: &str) -> Result<String, LlmError> {
    let Some(s) = value.as_str() else {
        return Err(fail(format!("{context}: expected non-empty string")));
    };
    if s.trim().is_empty() {
        return Err(fail(format!("{context}: expected non-empty string")));
    }
    Ok(s.to_string())
}

fn reject_extra_keys(obj: &serde_json::Map<String, Value>, allowed: &[&str], context: &str) -> Result<(), LlmError> {
    let extra: Vec<&str> = obj.keys().map(String::as_str).filter(|k| !allowed.contains(k)).collect();
    if !extra.is_empty() {
        return Err(fail(format!("{context}: unexpected keys: {extra:?}")));
    }
    Ok(())
}

fn require_keys(obj: &serde_json::Map<String, Value>, required: &[&str], context: &str) -> Result<(), LlmError> {
    let missing: Vec<&str> = required.iter().copied().filter(|k| !obj.contains_key(*k)).collect();
    if !missing.is_empty() {
        return Err(fail(format!("{context}: missing required keys: {missing:?}")));
    }
    Ok(())
}

/// Validate the top-level response and every finding strictly. Returns the
/// validated findings in wire shape, still unfiltered against the clause set
/// (evidence-span gating against clause bodies happens one layer up).
pub fn validate_llm_response(raw: &Value) -> Result<Vec<ValidatedFinding>, LlmError> {
    let root = raw.as_object().ok_or_else(|| fail("root: expected object"))?;
    require_keys(root, &["findings"], "root")?;
    reject_extra_keys(root, &["findings"], "root")?;

    let findings = root
        .get("findings")
        .and_then(Value::as_array)
        .ok_or_else(|| fail("root.findings: expected array"))?;

    let mut out = Vec::with_capacity(findings.len());
    for (idx, finding) in findings.iter().enumerate() {
        let ctx = format!("finding[{idx}]");
        let obj = finding.as_object().ok_or_else(|| fail(format!("{ctx}: expected object")))?;
        require_keys(obj, FINDING_KEYS, &ctx)?;
        reject_extra_keys(obj, FINDING_KEYS, &ctx)?;

        let clause_id = require_non_empty_str(&obj["clause_id"], &format!("{ctx}.clause_id"))?;

        let severity = obj["severity"]
            .as_str()
            .filter(|s| matches!(*s, "low" | "medium" | "high"))
            .ok_or_else(|| fail(format!("{ctx}.severity: expected one of low|medium|high")))?
            .to_string();

        let summary = require_non_empty_str(&obj["summary"], &format!("{ctx}.summary"))?;
        let explanation = require_non_empty_str(&obj["explanation"], &format!("{ctx}.explanation"))?;
        let evidence_text = require_non_empty_str(&obj["evidence_text"], &format!("{ctx}.evidence_text"))?;

        let span_ctx = format!("{ctx}.evidence_span");
        let span = obj["evidence_span"]
            .as_object()
            .ok_or_else(|| fail(format!("{span_ctx}: expected object")))?;
        require_keys(span, SPAN_KEYS, &span_ctx)?;
        reject_extra_keys(span, SPAN_KEYS, &span_ctx)?;

        let start = span["start"]
            .as_i64()
            .ok_or_else(|| fail(format!("{span_ctx}: start/end must be integers")))?;
        let end = span["end"]
            .as_i64()
            .ok_or_else(|| fail(format!("{span_ctx}: start/end must be integers")))?;
        if start < 0 || end <= start {
            return Err(fail(format!("{span_ctx}: expected 0 <= start < end")));
        }

        let confidence = obj["confidence"]
            .as_f64()
            .ok_or_else(|| fail(format!("{ctx}.confidence: expected number")))?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(fail(format!("{ctx}.confidence: expected between 0 and 1")));
        }

        out.push(ValidatedFinding {
            clause_id,
            severity,
            summary,
            explanation,
            evidence_text,
            evidence_start: start,
            evidence_end: end,
            confidence,
        });
    }

    Ok(out)
}

/// `true` when `[start, end)` is a valid, in-bounds span over `body`.
pub fn span_in_clause_body(start: i64, end: i64, body: &str) -> bool {
    start >= 0 && end > start && (end as usize) <= body.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_finding() -> Value {
        json!({
            "clause_id": "c1",
            "severity": "medium",
            "summary": "s",
            "explanation": "e",
            "evidence_text": "ev",
            "evidence_span": {"start": 0, "end": 2},
            "confidence": 0.5,
        })
    }

    #[test]
    fn accepts_well_formed_response() {
        let raw = json!({ "findings": [valid_finding()] });
        let parsed = validate_llm_response(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].clause_id, "c1");
    }

    #[test]
    fn rejects_unknown_root_key() {
        let raw = json!({ "findings": [], "extra": 1 });
        assert!(validate_llm_response(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_finding_key() {
        let mut f = valid_finding();
        f.as_object_mut().unwrap().insert("bogus".to_string(), json!(1));
        let raw = json!({ "findings": [f] });
        assert!(validate_llm_response(&raw).is_err());
    }

    #[test]
    fn rejects_bad_severity() {
        let mut f = valid_finding();
        f["severity"] = json!("critical");
        let raw = json!({ "findings": [f] });
        assert!(validate_llm_response(&raw).is_err());
    }

    #[test]
    fn rejects_inverted_span() {
        let mut f = valid_finding();
        f["evidence_span"] = json!({"start": 5, "end": 2});
        let raw = json!({ "findings": [f] });
        assert!(validate_llm_response(&raw).is_err());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let mut f = valid_finding();
        f["confidence"] = json!(1.5);
        let raw = json!({ "findings": [f] });
        assert!(validate_llm_response(&raw).is_err());
    }

    #[test]
    fn span_bounds_check() {
        assert!(span_in_clause_body(0, 4, "body"));
        assert!(!span_in_clause_body(0, 5, "body"));
        assert!(!span_in_clause_body(2, 2, "body"));
    }
}
