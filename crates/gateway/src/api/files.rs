//! `/v1/files[/:id]` (spec §6): multipart upload, metadata CRUD, raw content
//! download. File bytes never appear in the JSON wire shape — `File::content`
//! is `#[serde(skip)]`; only `/v1/files/:id/content` serves them.

use ag_domain::entities::File;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json};

use crate::api::assistants::{page_from_query, ListQuery};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<impl IntoResponse> {
    let mut filename: Option<String> = None;
    let mut purpose: Option<String> = None;
    let mut content: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_request(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::invalid_request(format!("reading file field: {e}")))?,
                );
            }
            "purpose" => {
                purpose = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::invalid_request(format!("reading purpose field: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| ApiError::invalid_request("missing required 'file' field"))?;
    let purpose = purpose.ok_or_else(|| ApiError::invalid_request("missing required 'purpose' field"))?;
    let filename = filename.unwrap_or_else(|| "upload.bin".to_string());

    let file = File::new(ag_domain::ids::file_id(), now_unix(), filename, purpose, content.to_vec());
    let created = state.store.create_file(file).await?;
    Ok(Json(created))
}

pub async fn get_file(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let file = state
        .store
        .get_file(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No file found with id '{id}'")))?;
    Ok(Json(file))
}

pub async fn get_file_content(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let file = state
        .store
        .get_file(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No file found with id '{id}'")))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], file.content))
}

pub async fn delete_file(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.delete_file(&id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("No file found with id '{id}'")));
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "object": "file.deleted",
        "deleted": true,
    })))
}

pub async fn list_files(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<impl IntoResponse> {
    let page = page_from_query(&q);
    let listing = state.store.list_files(&page).await?;
    Ok(Json(serde_json::json!({
        "object": "list",
        "data": listing.data,
        "first_id": listing.first_id,
        "last_id": listing.last_id,
        "has_more": listing.has_more,
    })))
}
