//! HTTP handlers for video records and their uploads.
//! Upload bodies are handed to `UploadService` unread; the service decides
//! whether to read them at all.

use super::extractors::AuthUser;
use crate::{
    errors::AppError,
    models::video::{NewVideo, Video},
    services::upload_service::UploadRequest,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
};
use uuid::Uuid;

fn parse_video_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request("Invalid video ID"))
}

/// `POST /api/videos`: create a draft owned by the caller.
pub async fn create_video(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<NewVideo>, JsonRejection>,
) -> Result<(StatusCode, Json<Video>), AppError> {
    let Json(draft) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    if draft.title.trim().is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let video = state.videos.create(user_id, draft).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

/// `GET /api/videos/{video_id}`: owner-only read with a fresh signed URL.
pub async fn get_video(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&raw_id)?;
    let video = state.uploads.video_for(video_id, user_id).await?;
    Ok(Json(video))
}

/// `POST /api/video_upload/{video_id}`: multipart field `video`.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    AuthUser(user_id): AuthUser,
    body: Request,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&raw_id)?;
    let video = state
        .uploads
        .upload_video(UploadRequest {
            video_id,
            user_id,
            body,
        })
        .await?;
    Ok(Json(video))
}

/// `POST /api/thumbnail_upload/{video_id}`: multipart field `thumbnail`.
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    AuthUser(user_id): AuthUser,
    body: Request,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&raw_id)?;
    let video = state
        .uploads
        .upload_thumbnail(UploadRequest {
            video_id,
            user_id,
            body,
        })
        .await?;
    Ok(Json(video))
}
