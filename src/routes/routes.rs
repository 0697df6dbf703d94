//! Defines routes for video records and uploads.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Records**
//!   - `POST /api/videos`: create a draft
//!   - `GET  /api/videos/{video_id}`: fetch with a signed video URL
//!
//! - **Uploads** (multipart, bearer token)
//!   - `POST /api/video_upload/{video_id}`: field `video`
//!   - `POST /api/thumbnail_upload/{video_id}`: field `thumbnail`
//!
//! - **Assets**
//!   - `GET  /assets/{name}`: published thumbnails

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        video_handlers::{create_video, get_video, upload_thumbnail, upload_video},
    },
    services::upload_service::UploadSettings,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::services::ServeDir;

/// Build the router for every route the service exposes.
///
/// Each upload route carries its own body limit derived from its field
/// ceiling; the bounded reader enforces the exact per-field limit.
pub fn routes(settings: &UploadSettings) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Records
        .route("/api/videos", post(create_video))
        .route("/api/videos/{video_id}", get(get_video))
        // Uploads
        .route(
            "/api/video_upload/{video_id}",
            post(upload_video).layer(DefaultBodyLimit::max(body_limit(
                settings.video.body_ceiling(),
            ))),
        )
        .route(
            "/api/thumbnail_upload/{video_id}",
            post(upload_thumbnail).layer(DefaultBodyLimit::max(body_limit(
                settings.thumbnail.body_ceiling(),
            ))),
        )
        .nest_service("/assets", ServeDir::new(&settings.assets_dir))
}

fn body_limit(ceiling: u64) -> usize {
    usize::try_from(ceiling).unwrap_or(usize::MAX)
}
