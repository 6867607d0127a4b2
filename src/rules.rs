//! Rule engine (component B): deterministic clause checks.
//!
//! Four fixed rules, run in order over every clause. Pure — no I/O, no
//! randomness, same output for the same input every time. Extending the
//! ruleset means appending to [`RULE_FUNCTIONS`]; nothing else in this
//! module needs to change.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::model::{Clause, EvidenceSpan, FindingSource, RawFinding, Severity};

/// A finding produced by a rule, before it's merged with LLM findings and
/// persisted (persistence adds `document_id`/`run_id`/`chunk_id`/`created_at`).
#[derive(Debug, Clone)]
pub struct RuleFinding {
    pub id: String,
    pub clause_id: String,
    pub rule_code: String,
    pub severity: Severity,
    pub summary: String,
    pub explanation: String,
    pub evidence_text: String,
    pub evidence_span: EvidenceSpan,
    pub source: FindingSource,
}

static DAYS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+(business\s+)?days?").unwrap());
static YEARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+years?").unwrap());
static TERMINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)terminate|termination").unwrap());
static INDEMNITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)indemnify|indemnification").unwrap());
static CONFIDENTIALITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)confidentiality|confidential information|non[- ]disclosure|nondisclosure")
        .unwrap()
});
static PERPETUAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)perpetual|in\s+perpetuity|indefinite").unwrap());
static GOVERNING_LAW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)governing law|laws of").unwrap());

fn find_min_days(text: &str) -> Option<i64> {
    DAYS_RE
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<i64>().ok())
        .min()
}

fn find_max_years(text: &str) -> Option<i64> {
    YEARS_RE
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<i64>().ok())
        .max()
}

/// Truncate to `max_len` chars, appending `...` when truncated.
fn short_snippet(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", head.trim_end())
}

/// Locate `evidence` inside `body` to produce a `[start, end)` span; when the
/// snippet (built from `heading + "\n" + body`, then truncated) can't be
/// found verbatim in `body` alone, fall back to a span over the start of the
/// body the same length as the evidence text.
fn span_in_body(body: &str, evidence: &str) -> EvidenceSpan {
    if let Some(start) = body.find(evidence) {
        return EvidenceSpan {
            start: start as i64,
            end: (start + evidence.len()) as i64,
            pointer: None,
        };
    }
    let end = evidence.len().max(1).min(body.len().max(1));
    EvidenceSpan {
        start: 0,
        end: end as i64,
        pointer: None,
    }
}

impl From<RuleFinding> for RawFinding {
    fn from(f: RuleFinding) -> Self {
        RawFinding {
            id: f.id,
            clause_id: f.clause_id.clone(),
            chunk_id: f.clause_id,
            rule_code: Some(f.rule_code),
            severity: f.severity,
            summary: f.summary,
            explanation: Some(f.explanation),
            recommendation: None,
            evidence_text: f.evidence_text,
            evidence_span: f.evidence_span,
            source: f.source,
            confidence: None,
            model: None,
            prompt_rev: None,
        }
    }
}

fn make_finding(
    clause: &Clause,
    rule_code: &str,
    severity: Severity,
    summary: String,
    explanation: String,
    evidence_text: String,
) -> RuleFinding {
    let evidence_span = span_in_body(&clause.body, &evidence_text);
    RuleFinding {
        id: Uuid::new_v4().to_string(),
        clause_id: clause.id.clone(),
        rule_code: rule_code.to_string(),
        severity,
        summary,
        explanation,
        evidence_text,
        evidence_span,
        source: FindingSource::Rule,
    }
}

fn rule_termination_notice_period(clause: &Clause, _preferred_jurisdiction: &str) -> Vec<RuleFinding> {
    let text = format!("{}\n{}", clause.heading, clause.body);
    if !TERMINATION_RE.is_match(&text) {
        return Vec::new();
    }

    let Some(min_days) = find_min_days(&text) else {
        return Vec::new();
    };

    let (severity, summary) = if min_days < 30 {
        (Severity::High, "Short termination notice period (< 30 days).")
    } else if min_days < 60 {
        (
            Severity::Medium,
            "Termination notice period between 30 and 60 days.",
        )
    } else {
        return Vec::new();
    };

    let explanation = format!(
        "The termination clause appears to allow termination with only {min_days} days' notice. \
         This may be shorter than a typical minimum of 30 days."
    );
    let evidence = short_snippet(&text, 280);

    vec![make_finding(
        clause,
        "TERM_NOTICE_MIN",
        severity,
        summary.to_string(),
        explanation,
        evidence,
    )]
}

fn rule_indemnity_clause(clause: &Clause, _preferred_jurisdiction: &str) -> Vec<RuleFinding> {
    let text = format!("{}\n{}", clause.heading, clause.body);
    if !INDEMNITY_RE.is_match(&text) {
        return Vec::new();
    }

    let summary = "Indemnity clause present.".to_string();
    let explanation = "This clause includes indemnity language (e.g., 'indemnify' or \
                        'indemnification'). Indemnity provisions can shift significant \
                        liability and should be reviewed carefully."
        .to_string();
    let evidence = short_snippet(&text, 280);

    vec![make_finding(
        clause,
        "INDEMNITY_PRESENT",
        Severity::High,
        summary,
        explanation,
        evidence,
    )]
}

fn rule_confidentiality_duration(clause: &Clause, _preferred_jurisdiction: &str) -> Vec<RuleFinding> {
    let text = format!("{}\n{}", clause.heading, clause.body);
    if !CONFIDENTIALITY_RE.is_match(&text) {
        return Vec::new();
    }

    if PERPETUAL_RE.is_match(&text) {
        let summary = "Confidentiality obligations appear perpetual.".to_string();
        let explanation = "The confidentiality clause appears to impose obligations in \
                            perpetuity or indefinitely. This may be more restrictive than \
                            typical time-limited confidentiality provisions."
            .to_string();
        let evidence = short_snippet(&text, 280);
        return vec![make_finding(
            clause,
            "CONF_PERPETUAL",
            Severity::High,
            summary,
            explanation,
            evidence,
        )];
    }

    let Some(max_years) = find_max_years(&text) else {
        return Vec::new();
    };

    if max_years <= 5 {
        return Vec::new();
    }

    let summary = "Confidentiality obligations longer than 5 years.".to_string();
    let explanation = format!(
        "The confidentiality clause appears to apply for {max_years} years, which may be \
         longer than common 2-5 year periods."
    );
    let evidence = short_snippet(&text, 280);

    vec![make_finding(
        clause,
        "CONF_LONG_TERM",
        Severity::Medium,
        summary,
        explanation,
        evidence,
    )]
}

fn rule_governing_law_mismatch(clause: &Clause, preferred_jurisdiction: &str) -> Vec<RuleFinding> {
    let text = format!("{}\n{}", clause.heading, clause.body);
    if !GOVERNING_LAW_RE.is_match(&text) {
        return Vec::new();
    }

    let jurisdiction_re = match Regex::new(&format!("(?i){}", regex::escape(preferred_jurisdiction))) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    if jurisdiction_re.is_match(&text) {
        return Vec::new();
    }

    let summary = format!("Governing law differs from preferred jurisdiction ({preferred_jurisdiction}).");
    let explanation = format!(
        "The clause appears to specify a governing law other than {preferred_jurisdiction}. \
         This may affect dispute resolution and should be reviewed."
    );
    let evidence = short_snippet(&text, 280);

    vec![make_finding(
        clause,
        "GOV_LAW_MISMATCH",
        Severity::Medium,
        summary,
        explanation,
        evidence,
    )]
}

/// Fixed, ordered rule set. Appending a new rule here is the only change
/// needed to extend the engine.
pub const RULE_FUNCTIONS: &[fn(&Clause, &str) -> Vec<RuleFinding>] = &[
    rule_termination_notice_period,
    rule_indemnity_clause,
    rule_confidentiality_duration,
    rule_governing_law_mismatch,
];

/// Run every rule over every clause, in clause × ruleset order.
pub fn run_rules(clauses: &[Clause], preferred_jurisdiction: &str) -> Vec<RuleFinding> {
    let mut findings = Vec::new();
    for clause in clauses {
        for rule_fn in RULE_FUNCTIONS {
            findings.extend(rule_fn(clause, preferred_jurisdiction));
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(heading: &str, body: &str) -> Clause {
        Clause {
            id: "clause-1".to_string(),
            heading: heading.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn termination_under_30_days_is_high() {
        let c = clause(
            "Termination",
            "Either party may terminate this agreement with 15 days notice.",
        );
        let findings = rule_termination_notice_period(&c, "California");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_code, "TERM_NOTICE_MIN");
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn termination_60_plus_days_is_not_flagged() {
        let c = clause("Termination", "Either party may terminate with 90 days notice.");
        assert!(rule_termination_notice_period(&c, "California").is_empty());
    }

    #[test]
    fn indemnity_always_high() {
        let c = clause(
            "Indemnity",
            "Vendor agrees to indemnify and hold harmless the customer.",
        );
        let findings = rule_indemnity_clause(&c, "California");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn confidentiality_perpetual_is_high() {
        let c = clause(
            "Confidentiality",
            "The confidential information shall remain confidential in perpetuity.",
        );
        let findings = rule_confidentiality_duration(&c, "California");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_code, "CONF_PERPETUAL");
    }

    #[test]
    fn confidentiality_long_term_years() {
        let c = clause(
            "Confidentiality",
            "Confidentiality obligations survive for 10 years after termination.",
        );
        let findings = rule_confidentiality_duration(&c, "California");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_code, "CONF_LONG_TERM");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn confidentiality_short_term_not_flagged() {
        let c = clause(
            "Confidentiality",
            "Confidentiality obligations survive for 2 years after termination.",
        );
        assert!(rule_confidentiality_duration(&c, "California").is_empty());
    }

    #[test]
    fn governing_law_mismatch_flagged() {
        let c = clause("Governing Law", "This agreement is governed by the laws of Delaware.");
        let findings = rule_governing_law_mismatch(&c, "California");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_code, "GOV_LAW_MISMATCH");
    }

    #[test]
    fn governing_law_match_not_flagged() {
        let c = clause("Governing Law", "This agreement is governed by the laws of California.");
        assert!(rule_governing_law_mismatch(&c, "California").is_empty());
    }

    #[test]
    fn run_rules_preserves_clause_by_ruleset_order() {
        let clauses = vec![
            clause(
                "Termination",
                "Either party may terminate with 15 days notice.",
            ),
            clause("Indemnity", "Vendor agrees to indemnify the customer."),
        ];
        let findings = run_rules(&clauses, "California");
        assert_eq!(findings[0].clause_id, "clause-1");
        assert_eq!(findings[0].rule_code, "TERM_NOTICE_MIN");
    }
}
