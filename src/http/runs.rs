use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{Document, ReviewRun};

use super::AppState;

#[derive(Deserialize)]
pub(super) struct CreateReviewRunRequest {
    document_id: String,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub(super) struct CreateReviewRunResponse {
    document: Document,
    clauses: Vec<Value>,
    findings: Vec<Value>,
    run: ReviewRun,
    idempotency_reused: bool,
}

/// `POST /v1/review/run`. The `Idempotency-Key` header takes
/// precedence over a same-named field in the JSON body.
pub(super) async fn create_review_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateReviewRunRequest>,
) -> Result<(StatusCode, Json<CreateReviewRunResponse>)> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(body.idempotency_key);

    let request_fingerprint = headers
        .get("X-Requester-Fingerprint")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let outcome = state
        .intake
        .enqueue_run(&body.document_id, idempotency_key.as_deref(), &request_fingerprint)
        .await?;

    let document = state.store.get_document(&body.document_id).await?;
    let status = if outcome.idempotency_reused { StatusCode::OK } else { StatusCode::ACCEPTED };

    Ok((
        status,
        Json(CreateReviewRunResponse {
            document,
            clauses: Vec::new(),
            findings: Vec::new(),
            run: outcome.run,
            idempotency_reused: outcome.idempotency_reused,
        }),
    ))
}

#[derive(Serialize)]
pub(super) struct GetReviewRunResponse {
    run: ReviewRun,
    document: Document,
}

/// `GET /v1/review-runs/{run_id}` → 200 `{run, document}`.
pub(super) async fn get_review_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<GetReviewRunResponse>> {
    let run = state.store.get_run(&run_id).await?;
    let document = state.store.get_document(&run.document_id).await?;
    Ok(Json(GetReviewRunResponse { run, document }))
}
