//! Tubely: authenticated video ingest. Uploads are bounded, remuxed for
//! fast start, classified by geometry, stored in S3 and handed back as
//! short-lived signed URLs.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use config::AppConfig;
use services::{
    auth::Authenticator,
    media_tools::{FfmpegRemuxer, FfprobeProbe},
    object_storage::S3ObjectStorage,
    scratch::ScratchDir,
    upload_service::{UploadService, UploadSettings},
    video_store::SqliteVideoStore,
};
use sqlx::SqlitePool;
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Wire the production collaborators (SQLite, S3, ffmpeg/ffprobe) into
/// application state.
pub async fn build_state(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<AppState> {
    let scratch = ScratchDir::create_in(&cfg.scratch_root)
        .with_context(|| format!("creating scratch directory under {}", cfg.scratch_root))?;
    tracing::info!("Scratch directory at {}", scratch.path().display());

    let objects = S3ObjectStorage::from_env(
        cfg.s3_bucket.clone(),
        cfg.s3_region.clone(),
        cfg.s3_endpoint.clone(),
    )
    .await;

    let videos = Arc::new(SqliteVideoStore::new(db));
    let uploads = UploadService::new(
        videos.clone(),
        Arc::new(objects),
        Arc::new(FfmpegRemuxer::new(cfg.ffmpeg_path.clone())),
        Arc::new(FfprobeProbe::new(cfg.ffprobe_path.clone())),
        scratch,
        UploadSettings::from_config(cfg),
    );

    Ok(AppState {
        auth: Authenticator::new(&cfg.jwt_secret),
        videos,
        uploads,
    })
}

/// Full HTTP application: routes, request tracing and state.
pub fn app(state: AppState) -> Router {
    routes::routes::routes(state.uploads.settings())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
