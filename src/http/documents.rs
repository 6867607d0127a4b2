use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::Serialize;

use crate::document;
use crate::error::{Error, Result};

use super::AppState;

#[derive(Serialize)]
pub(super) struct UploadResponse {
    id: String,
    title: String,
    created_at: String,
}

/// `POST /v1/documents/upload` (multipart: `title`, `file`) → 201
/// `{id, title, created_at}`.
pub(super) async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut title: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| Error::BadRequest(format!("invalid multipart body: {err}")))?
    {
        match field.name().unwrap_or_default() {
            "title" => {
                let text = field.text().await.map_err(|err| Error::BadRequest(err.to_string()))?;
                title = Some(text);
            }
            "file" => {
                filename = field.file_name().map(|n| n.to_string());
                let data = field.bytes().await.map_err(|err| Error::BadRequest(err.to_string()))?;
                bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let filename = filename.ok_or_else(|| Error::BadRequest("missing file field".to_string()))?;
    let bytes = bytes.ok_or_else(|| Error::BadRequest("missing file field".to_string()))?;

    let mut doc = document::ingest(&filename, bytes).await?;
    if let Some(title) = title {
        doc.title = title;
    }

    state.store.create_document(&doc).await?;
    let doc = state.store.get_document(&doc.id).await?;

    tracing::info!(document_id = %doc.id, source_type = %doc.source_type, "document uploaded");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse { id: doc.id, title: doc.title, created_at: doc.created_at }),
    ))
}
