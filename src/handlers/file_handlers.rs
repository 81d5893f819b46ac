//! HTTP handlers for the `/api/files` surface.
//! Each handler resolves the caller, decodes the request and delegates to
//! `LifecycleCoordinator`.

use crate::{
    errors::AppError,
    handlers::auth::AuthUser,
    models::file::{FileRecord, ListOptions, NewFile, RenameRequest},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use uuid::Uuid;

/// Name given to uploads that arrive without one.
const DEFAULT_FILENAME: &str = "New file";

/// The `file` part of a multipart form.
struct FilePart {
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request("Invalid ID format"))
}

/// Pull the `file` field out of a multipart body, skipping anything else.
async fn read_file_part(mut multipart: Multipart) -> Result<FilePart, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty());
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await?;
        return Ok(FilePart {
            filename,
            content_type,
            data,
        });
    }
    Err(AppError::bad_request("Wrong form format: missing `file` field"))
}

/// `POST /api/files` - upload a new file (multipart field `file`).
pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<Json<FileRecord>, AppError> {
    let part = read_file_part(multipart).await?;
    let filename = part.filename.unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let content_type = part.content_type.unwrap_or_else(|| {
        mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string()
    });

    let record = state
        .files
        .upload(
            user,
            NewFile {
                filename,
                content_type,
                size: part.data.len() as i64,
                data: part.data,
            },
        )
        .await?;
    Ok(Json(record))
}

/// `POST /api/files/list` - the caller's files.
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ListOptions>, JsonRejection>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let Json(options) = payload?;
    Ok(Json(state.files.list(user, options).await?))
}

/// `GET /api/files/{id}` - download content as an attachment.
pub async fn get_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let file = state.files.fetch(user, id).await?;

    let mut response = Response::new(Body::from(file.data));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size.max(0) as u64));
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&file.filename)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// `GET /api/files/{id}/meta`
pub async fn get_metadata(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.files.metadata(user, id).await?))
}

/// `POST /api/files/{id}` - replace content (multipart field `file`).
pub async fn update_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let part = read_file_part(multipart).await?;
    let size = part.data.len() as i64;
    state.files.overwrite(user, id, part.data, size).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/files/{id}/name`
pub async fn rename_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let Json(body) = payload?;
    state.files.rename(user, id, &body.filename).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/files/{id}` - soft-delete.
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    state.files.soft_delete(user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
