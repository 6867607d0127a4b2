use anyhow::Context as _;
use sqlx::Row as _;

use crate::error::Result;
use crate::model::{EvidenceSpan, Finding, FindingSource, RawFinding, Severity};

use super::ReviewStore;

fn finding_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Finding> {
    let severity_value: String = row.try_get("severity").context("failed to read finding severity")?;
    let severity = Severity::parse(&severity_value).unwrap_or(Severity::Medium);

    let source_value: String = row.try_get("source").context("failed to read finding source")?;
    let source = FindingSource::parse(&source_value).unwrap_or(FindingSource::Unknown);

    let span_value: String = row.try_get("evidence_span").context("failed to read finding evidence_span")?;
    let evidence_span: EvidenceSpan =
        serde_json::from_str(&span_value).unwrap_or(EvidenceSpan { start: 0, end: 0, pointer: None });

    Ok(Finding {
        id: row.try_get("id").context("failed to read finding id")?,
        document_id: row.try_get("document_id").context("failed to read finding document_id")?,
        run_id: row.try_get("run_id").ok(),
        clause_id: row.try_get("clause_id").context("failed to read finding clause_id")?,
        chunk_id: row.try_get("chunk_id").context("failed to read finding chunk_id")?,
        clause_heading: row.try_get("clause_heading").ok(),
        clause_body: row.try_get("clause_body").ok(),
        summary: row.try_get("summary").context("failed to read finding summary")?,
        explanation: row.try_get("explanation").ok(),
        recommendation: row.try_get("recommendation").ok(),
        severity,
        evidence: row.try_get("evidence").context("failed to read finding evidence")?,
        evidence_span,
        source,
        rule_code: row.try_get("rule_code").ok(),
        model: row.try_get("model").ok(),
        confidence: row.try_get("confidence").ok(),
        prompt_rev: row.try_get("prompt_rev").ok(),
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .map(|v| v.and_utc().to_rfc3339())
            .context("failed to read finding created_at")?,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub enum FindingsOrdering {
    #[default]
    CreatedAt,
    Severity,
    Source,
    Confidence,
}

impl FindingsOrdering {
    pub fn parse(raw: &str) -> (Self, bool) {
        let (descending, key) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let ordering = match key {
            "severity" => FindingsOrdering::Severity,
            "source" => FindingsOrdering::Source,
            "confidence" => FindingsOrdering::Confidence,
            // Unknown orderings fall back to created_at.
            _ => FindingsOrdering::CreatedAt,
        };
        (ordering, descending)
    }

    fn column(self) -> &'static str {
        match self {
            FindingsOrdering::CreatedAt => "created_at",
            FindingsOrdering::Severity => "severity",
            FindingsOrdering::Source => "source",
            FindingsOrdering::Confidence => "confidence",
        }
    }
}

pub struct FindingsPage {
    pub findings: Vec<Finding>,
    pub total: i64,
}

impl ReviewStore {
    /// Delete existing findings for `run_id`, then bulk-insert the merged
    /// rule+LLM findings, inferring `llm_model`/`prompt_rev` from the first
    /// LLM-sourced finding and writing them back onto the run.
    pub async fn persist_findings_for_run(
        &self,
        run_id: &str,
        document_id: &str,
        clauses: &[crate::model::Clause],
        findings: &[RawFinding],
    ) -> Result<()> {
        let clause_by_id: std::collections::HashMap<&str, &crate::model::Clause> =
            clauses.iter().map(|c| (c.id.as_str(), c)).collect();

        let inferred = findings
            .iter()
            .find(|f| f.source == FindingSource::Llm)
            .map(|f| (f.model.clone(), f.prompt_rev.clone()));

        let mut tx = self
            .pool()
            .begin()
            .await
            .context("failed to open finding persistence transaction")?;

        if let Some((llm_model, prompt_rev)) = inferred {
            sqlx::query("UPDATE review_runs SET llm_model = ?, prompt_rev = ? WHERE id = ?")
                .bind(llm_model)
                .bind(prompt_rev)
                .bind(run_id)
                .execute(&mut *tx)
                .await
                .context("failed to update run llm_model/prompt_rev")?;
        }

        sqlx::query("DELETE FROM findings WHERE run_id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete existing findings")?;

        for finding in findings {
            let clause = clause_by_id.get(finding.clause_id.as_str());
            let span_json = serde_json::to_string(&finding.evidence_span).unwrap_or_else(|_| "{}".to_string());

            sqlx::query(
                r#"
                INSERT INTO findings (
                    id, document_id, run_id, clause_id, chunk_id, clause_heading, clause_body,
                    summary, explanation, recommendation, severity, evidence, evidence_span,
                    source, rule_code, model, confidence, prompt_rev
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&finding.id)
            .bind(document_id)
            .bind(run_id)
            .bind(&finding.clause_id)
            .bind(&finding.chunk_id)
            .bind(clause.map(|c| c.heading.as_str()))
            .bind(clause.map(|c| c.body.as_str()))
            .bind(&finding.summary)
            .bind(&finding.explanation)
            .bind(None::<String>)
            .bind(finding.severity.as_str())
            .bind(&finding.evidence_text)
            .bind(&span_json)
            .bind(finding.source.as_str())
            .bind(&finding.rule_code)
            .bind(&finding.model)
            .bind(finding.confidence)
            .bind(&finding.prompt_rev)
            .execute(&mut *tx)
            .await
            .context("failed to insert finding")?;
        }

        tx.commit()
            .await
            .context("failed to commit finding persistence transaction")?;
        Ok(())
    }

    pub async fn list_findings_for_run(&self, run_id: &str) -> Result<Vec<Finding>> {
        let rows = sqlx::query(
            "SELECT * FROM findings WHERE run_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(run_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list findings for run")?;

        rows.into_iter().map(finding_from_row).collect()
    }

    /// Paginated findings for a document, optionally narrowed to one run
    ///. Secondary
    /// order is always by `id` for a stable total order under ties.
    pub async fn list_findings_page(
        &self,
        document_id: &str,
        run_id: Option<&str>,
        ordering: FindingsOrdering,
        descending: bool,
        page: i64,
        page_size: i64,
    ) -> Result<FindingsPage> {
        let direction = if descending { "DESC" } else { "ASC" };
        let column = ordering.column();
        let offset = (page - 1).max(0) * page_size;

        let mut where_clause = "WHERE document_id = ?".to_string();
        if run_id.is_some() {
            where_clause.push_str(" AND run_id = ?");
        }

        let count_sql = format!("SELECT COUNT(*) as n FROM findings {where_clause}");
        let mut count_query = sqlx::query(&count_sql).bind(document_id);
        if let Some(run_id) = run_id {
            count_query = count_query.bind(run_id);
        }
        let total: i64 = count_query
            .fetch_one(self.pool())
            .await
            .context("failed to count findings")?
            .try_get("n")
            .context("failed to read findings count")?;

        let list_sql = format!(
            "SELECT * FROM findings {where_clause} ORDER BY {column} {direction}, id ASC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql).bind(document_id);
        if let Some(run_id) = run_id {
            list_query = list_query.bind(run_id);
        }
        list_query = list_query.bind(page_size).bind(offset);

        let rows = list_query
            .fetch_all(self.pool())
            .await
            .context("failed to list findings page")?;

        let findings = rows.into_iter().map(finding_from_row).collect::<Result<Vec<_>>>()?;
        Ok(FindingsPage { findings, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Clause;
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

    fn raw_finding(id: &str, clause_id: &str, source: FindingSource) -> RawFinding {
        RawFinding {
            id: id.to_string(),
            clause_id: clause_id.to_string(),
            chunk_id: clause_id.to_string(),
            rule_code: if source == FindingSource::Rule { Some("TERM_NOTICE_MIN".to_string()) } else { None },
            severity: Severity::High,
            summary: "summary".to_string(),
            explanation: Some("explanation".to_string()),
            recommendation: None,
            evidence_text: "evidence".to_string(),
            evidence_span: EvidenceSpan { start: 0, end: 5, pointer: None },
            source,
            confidence: if source == FindingSource::Llm { Some(0.7) } else { None },
            model: if source == FindingSource::Llm { Some("mock".to_string()) } else { None },
            prompt_rev: if source == FindingSource::Llm { Some("v1".to_string()) } else { None },
        }
    }

    #[tokio::test]
    async fn persist_is_idempotent_and_infers_model_fields() {
        let store = setup().await;
        store.create_document(&crate::model::Document {
            id: "doc-1".to_string(),
            title: "t".to_string(),
            text: "x".to_string(),
            source_type: crate::model::SourceType::Text,
            ingestion_metadata: serde_json::Value::Null,
            created_at: String::new(),
        }).await.unwrap();
        sqlx::query("INSERT INTO review_runs (id, document_id, request_fingerprint) VALUES (?, ?, ?)")
            .bind("run-1")
            .bind("doc-1")
            .bind("fp-1")
            .execute(store.pool())
            .await
            .unwrap();

        let clauses = vec![Clause { id: "c1".to_string(), heading: "H".to_string(), body: "Body text".to_string() }];
        let findings = vec![
            raw_finding("f1", "c1", FindingSource::Rule),
            raw_finding("f2", "c1", FindingSource::Llm),
        ];

        store.persist_findings_for_run("run-1", "doc-1", &clauses, &findings).await.unwrap();
        store.persist_findings_for_run("run-1", "doc-1", &clauses, &findings).await.unwrap();

        let stored = store.list_findings_for_run("run-1").await.unwrap();
        assert_eq!(stored.len(), 2);

        let run = store.get_run("run-1").await.unwrap();
        assert_eq!(run.llm_model.as_deref(), Some("mock"));
        assert_eq!(run.prompt_rev.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn pagination_reports_totals_and_pages() {
        let store = setup().await;
        store.create_document(&crate::model::Document {
            id: "doc-1".to_string(),
            title: "t".to_string(),
            text: "x".to_string(),
            source_type: crate::model::SourceType::Text,
            ingestion_metadata: serde_json::Value::Null,
            created_at: String::new(),
        }).await.unwrap();
        sqlx::query("INSERT INTO review_runs (id, document_id, request_fingerprint) VALUES (?, ?, ?)")
            .bind("run-1")
            .bind("doc-1")
            .bind("fp-1")
            .execute(store.pool())
            .await
            .unwrap();

        let clauses = vec![Clause { id: "c1".to_string(), heading: "H".to_string(), body: "Body text".to_string() }];
        let findings: Vec<RawFinding> = (0..5)
            .map(|i| raw_finding(&format!("f{i}"), "c1", FindingSource::Rule))
            .collect();
        store.persist_findings_for_run("run-1", "doc-1", &clauses, &findings).await.unwrap();

        let page = store
            .list_findings_page("doc-1", None, FindingsOrdering::CreatedAt, false, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.findings.len(), 2);
    }
}
