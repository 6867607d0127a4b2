use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Document, Finding, ReviewRun};
use crate::store::FindingsOrdering;

use super::AppState;

#[derive(Deserialize)]
pub(super) struct FindingsQuery {
    run_id: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
    ordering: Option<String>,
}

#[derive(Serialize)]
pub(super) struct Pagination {
    page: i64,
    page_size: i64,
    total: i64,
    total_pages: i64,
    has_next: bool,
    has_prev: bool,
}

#[derive(Serialize)]
pub(super) struct FindingsResponse {
    document: Document,
    run: Option<ReviewRun>,
    findings: Vec<Finding>,
    pagination: Pagination,
}

/// `GET /v1/documents/{document_id}/findings?run_id=&page=&page_size=&ordering=`
///.
pub(super) async fn list_document_findings(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Query(query): Query<FindingsQuery>,
) -> Result<Json<FindingsResponse>> {
    let document = state.store.get_document(&document_id).await?;

    let run = match query.run_id {
        Some(run_id) => Some(state.store.get_run(&run_id).await?),
        None => state.store.find_latest_run_for_document(&document_id).await?,
    };

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(state.config.findings_default_page_size)
        .clamp(1, state.config.findings_max_page_size);

    let (ordering, descending) = FindingsOrdering::parse(query.ordering.as_deref().unwrap_or("created_at"));

    let run_id = run.as_ref().map(|r| r.id.as_str());
    let result = state
        .store
        .list_findings_page(&document_id, run_id, ordering, descending, page, page_size)
        .await?;

    let total_pages = if result.total == 0 { 0 } else { (result.total + page_size - 1) / page_size };

    Ok(Json(FindingsResponse {
        document,
        run,
        findings: result.findings,
        pagination: Pagination {
            page,
            page_size,
            total: result.total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        },
    }))
}
