//! POST /receive - multipart image upload
//!
//! Reads the form part named `file`. The declared size is the part's
//! `Content-Length` header when the client sends one, otherwise the number
//! of bytes received.

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::header::CONTENT_LENGTH;
use tracing::error;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const FILE_FIELD: &str = "file";

pub async fn receive_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<String> {
    let result = upload(&state, multipart).await;
    if let Err(e) = &result {
        error!(error = %e, "Upload failed");
    }
    result
}

async fn upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<String> {
    let mut multipart = multipart.map_err(|e| ApiError::Form(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Form(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let declared = declared_size(&field);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Form(e.body_text()))?;
        let declared = declared.unwrap_or(data.len() as u64);

        state.receiver.receive(&filename, declared, data).await?;
        return Ok(format!("File {} uploaded successfully.", filename));
    }

    Err(ApiError::Form(format!("no {:?} part in form", FILE_FIELD)))
}

fn declared_size(field: &Field<'_>) -> Option<u64> {
    field
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
