//! # Files API
//!
//! Audit evidence (photos, signed documents) is uploaded as base64 inside
//! a JSON body and stored under the client's file name, so a form value
//! can reference it by name. A later upload with the same name replaces
//! the file.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nexus_core::access::abilities;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_validated_json, is_blank, Validate};
use crate::state::AppState;
use crate::storage::{content_type_for, StorageError};

/// Largest decoded file accepted.
pub const MAX_FILE_BYTES: usize = 20 * 1024 * 1024;

/// Request body limit for the upload route; base64 inflates by 4/3.
const UPLOAD_BODY_LIMIT: usize = MAX_FILE_BYTES / 3 * 4 + 64 * 1024;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// File content, base64; a `data:<mime>;base64,` prefix is accepted.
    pub file: String,
    pub file_name: String,
    /// Form field the file belongs to.
    pub field_id: Option<String>,
}

impl Validate for UploadRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(is_blank(&self.file), "file", "The file field is required.");
        v.check(
            is_blank(&self.file_name),
            "fileName",
            "The file name field is required.",
        );
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_name: String,
    /// Storage path relative to the storage root.
    pub path: String,
    /// Download URL.
    pub url: String,
    pub field_id: Option<String>,
    pub size: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/upload-file",
            post(upload_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/files/:filename", get(download_file))
}

/// Decode base64 content, dropping a data-URL prefix and whitespace.
fn decode_content(raw: &str) -> Result<Vec<u8>, AppError> {
    let payload = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact.as_bytes()).map_err(|_| {
        AppError::InvalidFields(Violations::single("file", "The file must be base64 encoded."))
    })?;
    if bytes.is_empty() {
        return Err(AppError::InvalidFields(Violations::single(
            "file",
            "The file must not be empty.",
        )));
    }
    if bytes.len() > MAX_FILE_BYTES {
        return Err(AppError::InvalidFields(Violations::single(
            "file",
            "The file may not be greater than 20 MiB.",
        )));
    }
    Ok(bytes)
}

fn storage_error(e: StorageError) -> AppError {
    match e {
        StorageError::InvalidName(_) => AppError::InvalidFields(Violations::single(
            "fileName",
            "The file name must be a plain file name.",
        )),
        StorageError::NotFound(name) => AppError::NotFound(format!("file {name} not found")),
        StorageError::Io(e) => AppError::Internal(format!("file storage failed: {e}")),
    }
}

/// POST /api/upload-file: Store an evidence file.
#[utoipa::path(
    post,
    path = "/api/upload-file",
    request_body = UploadRequest,
    responses(
        (status = 201, description = "File stored", body = UploadResponse),
        (status = 422, description = "Invalid content or file name", body = crate::error::ErrorBody),
    ),
    tag = "files"
)]
pub(crate) async fn upload_file(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    require_ability(&caller, abilities::CREATE_AUDITS)?;
    let req = extract_validated_json(body)?;
    let bytes = decode_content(&req.file)?;

    let stored = state
        .storage
        .put_audit_file(&req.file_name, &bytes)
        .await
        .map_err(storage_error)?;

    crate::activity::record(
        &state,
        Some(caller.user_id),
        "uploaded",
        "file",
        None,
        json!({ "file_name": stored.file_name, "field_id": req.field_id, "size": stored.size }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: format!("/api/files/{}", stored.file_name),
            file_name: stored.file_name,
            path: stored.relative_path,
            field_id: req.field_id,
            size: stored.size,
        }),
    ))
}

/// GET /api/files/{filename}: Download an evidence file.
#[utoipa::path(
    get,
    path = "/api/files/{filename}",
    params(("filename" = String, Path, description = "Stored file name")),
    responses(
        (status = 200, description = "File content"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "files"
)]
pub(crate) async fn download_file(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    if !caller.can(abilities::CREATE_AUDITS) {
        require_ability(&caller, abilities::VIEW_AUDITS)?;
    }
    let bytes = state
        .storage
        .get_audit_file(&filename)
        .await
        .map_err(storage_error)?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&filename))],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_prefix_is_stripped() {
        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG"));
        assert_eq!(decode_content(&encoded).unwrap(), b"\x89PNG");
    }

    #[test]
    fn wrapped_base64_is_accepted() {
        let encoded = STANDARD.encode(b"inspection report body");
        let wrapped = format!("{}\n{}", &encoded[..8], &encoded[8..]);
        assert_eq!(decode_content(&wrapped).unwrap(), b"inspection report body");
    }

    #[test]
    fn garbage_and_empty_content_are_rejected() {
        assert!(matches!(
            decode_content("not base64!"),
            Err(AppError::InvalidFields(_))
        ));
        assert!(matches!(decode_content(""), Err(AppError::InvalidFields(_))));
    }

    #[test]
    fn path_names_map_to_the_file_name_field() {
        let err = storage_error(StorageError::InvalidName("../etc/passwd".into()));
        match err {
            AppError::InvalidFields(v) => assert!(v.get("fileName").is_some()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
