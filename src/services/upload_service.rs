//! src/services/upload_service.rs
//!
//! UploadService drives a single upload from request to committed record:
//! authorize the caller, stream the file field into scratch, fast-start remux,
//! classify, push to object storage and write the reference onto the video.
//! Stages run strictly in order and the first failure ends the run; every
//! scratch artifact is owned by a local, so unwinding out of a stage removes
//! whatever that run had written.

use super::{
    intake::{
        FieldSpec, THUMBNAIL_MEDIA_TYPES, VIDEO_MEDIA_TYPES, extension_for, ingest_file_field,
        open_multipart,
    },
    media_tools::{MediaToolError, Probe, Remuxer, classify},
    object_storage::{ObjectStorage, ObjectStorageError, video_object_key},
    scratch::{ScratchArtifact, ScratchDir},
    video_store::{VideoStore, VideoStoreError},
};
use crate::{
    config::AppConfig,
    models::{object_ref::StorageObjectRef, video::Video},
};
use axum::extract::Request;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use std::{
    fmt, io,
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Coarse failure taxonomy used at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    UpstreamToolFailure,
    StorageFailure,
    MetadataFailure,
}

impl ErrorClass {
    /// Failures caused by this service or its dependencies rather than by
    /// the request.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            Self::UpstreamToolFailure | Self::StorageFailure | Self::MetadataFailure
        )
    }
}

/// Everything that can end an upload. Messages are safe to show to clients;
/// details stay in the error source and the logs.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("you are not the owner of this video")]
    Forbidden,
    #[error("video `{0}` not found")]
    VideoNotFound(Uuid),
    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("missing `{0}` file field")]
    MissingFile(&'static str),
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("failed to process video")]
    RemuxFailed(#[source] MediaToolError),
    #[error("failed to read video metadata")]
    ProbeFailed(#[source] MediaToolError),
    #[error("no video stream found")]
    NoStreamsFound,
    #[error("unreadable video dimensions")]
    ProbeParseError(String),
    #[error("failed to store upload")]
    StorageIo(#[from] io::Error),
    #[error("failed to store video")]
    UploadFailed(#[source] ObjectStorageError),
    #[error("failed to sign video URL")]
    SigningFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to save video metadata")]
    Metadata(#[source] VideoStoreError),
}

impl UploadError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PayloadTooLarge { .. }
            | Self::MissingFile(_)
            | Self::MalformedUpload(_)
            | Self::UnsupportedMediaType(_) => ErrorClass::BadRequest,
            Self::Forbidden => ErrorClass::Forbidden,
            Self::VideoNotFound(_) => ErrorClass::NotFound,
            Self::RemuxFailed(_)
            | Self::ProbeFailed(_)
            | Self::NoStreamsFound
            | Self::ProbeParseError(_) => ErrorClass::UpstreamToolFailure,
            Self::StorageIo(_) | Self::UploadFailed(_) | Self::SigningFailed(_) => {
                ErrorClass::StorageFailure
            }
            Self::Metadata(_) => ErrorClass::MetadataFailure,
        }
    }
}

impl From<VideoStoreError> for UploadError {
    fn from(err: VideoStoreError) -> Self {
        match err {
            VideoStoreError::NotFound(id) => Self::VideoNotFound(id),
            other => Self::Metadata(other),
        }
    }
}

fn probe_failure(err: MediaToolError) -> UploadError {
    match err {
        MediaToolError::NoStreams => UploadError::NoStreamsFound,
        MediaToolError::ProbeParse(detail) => UploadError::ProbeParseError(detail),
        other => UploadError::ProbeFailed(other),
    }
}

/// Pipeline position of an upload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authorizing,
    Ingesting,
    Validating,
    Remuxing,
    Classifying,
    Uploading,
    Committing,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorizing => "authorizing",
            Self::Ingesting => "ingesting",
            Self::Validating => "validating",
            Self::Remuxing => "remuxing",
            Self::Classifying => "classifying",
            Self::Uploading => "uploading",
            Self::Committing => "committing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage bookkeeping and logging for one run.
#[derive(Debug)]
pub struct PipelineRun {
    kind: &'static str,
    video_id: Uuid,
    stage: Stage,
    started: Instant,
}

impl PipelineRun {
    pub fn start(kind: &'static str, video_id: Uuid) -> Self {
        let run = Self {
            kind,
            video_id,
            stage: Stage::Authorizing,
            started: Instant::now(),
        };
        info!(video_id = %video_id, kind, stage = %run.stage, "upload started");
        run
    }

    #[cfg(test)]
    fn stage(&self) -> Stage {
        self.stage
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        info!(
            video_id = %self.video_id,
            kind = self.kind,
            stage = %stage,
            elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            "upload stage"
        );
    }

    /// Log how the run ended and hand the outcome back.
    pub fn settle<T>(mut self, outcome: Result<T, UploadError>) -> Result<T, UploadError> {
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(value) => {
                self.enter(Stage::Done);
                info!(video_id = %self.video_id, kind = self.kind, duration_ms, "upload complete");
                Ok(value)
            }
            Err(err) => {
                if err.class().is_internal() {
                    error!(
                        video_id = %self.video_id,
                        kind = self.kind,
                        stage = %self.stage,
                        duration_ms,
                        error = ?err,
                        "upload failed"
                    );
                } else {
                    warn!(
                        video_id = %self.video_id,
                        kind = self.kind,
                        stage = %self.stage,
                        duration_ms,
                        error = %err,
                        "upload rejected"
                    );
                }
                Err(err)
            }
        }
    }
}

/// One upload as received: target record, caller and the raw request whose
/// body carries the multipart form.
pub struct UploadRequest {
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub body: Request,
}

/// Limits and publishing targets for uploads.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub video: FieldSpec,
    pub thumbnail: FieldSpec,
    pub signed_url_ttl: Duration,
    pub assets_dir: PathBuf,
    pub public_base_url: String,
}

impl UploadSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            video: FieldSpec {
                name: "video",
                accepted: VIDEO_MEDIA_TYPES,
                max_bytes: cfg.max_video_bytes,
                max_form_bytes: cfg.max_form_field_bytes,
            },
            thumbnail: FieldSpec {
                name: "thumbnail",
                accepted: THUMBNAIL_MEDIA_TYPES,
                max_bytes: cfg.max_thumbnail_bytes,
                max_form_bytes: cfg.max_form_field_bytes,
            },
            signed_url_ttl: Duration::from_secs(cfg.signed_url_ttl_secs),
            assets_dir: PathBuf::from(&cfg.assets_dir),
            public_base_url: cfg.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    videos: Arc<dyn VideoStore>,
    objects: Arc<dyn ObjectStorage>,
    remuxer: Arc<dyn Remuxer>,
    probe: Arc<dyn Probe>,
    scratch: ScratchDir,
    settings: UploadSettings,
}

impl UploadService {
    pub fn new(
        videos: Arc<dyn VideoStore>,
        objects: Arc<dyn ObjectStorage>,
        remuxer: Arc<dyn Remuxer>,
        probe: Arc<dyn Probe>,
        scratch: ScratchDir,
        settings: UploadSettings,
    ) -> Self {
        Self {
            videos,
            objects,
            remuxer,
            probe,
            scratch,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    /// Fetch `video_id` and make sure `user_id` owns it.
    pub async fn authorize(&self, video_id: Uuid, user_id: Uuid) -> Result<Video, UploadError> {
        let video = self.videos.get(video_id).await?;
        if video.user_id != user_id {
            return Err(UploadError::Forbidden);
        }
        Ok(video)
    }

    /// Owner-only read with the video reference freshly signed.
    pub async fn video_for(&self, video_id: Uuid, user_id: Uuid) -> Result<Video, UploadError> {
        let video = self.authorize(video_id, user_id).await?;
        self.sign_video(video).await
    }

    /// Replace the stored `bucket,key` reference with a presigned GET URL.
    /// Records without a video pass through untouched.
    pub async fn sign_video(&self, mut video: Video) -> Result<Video, UploadError> {
        let Some(encoded) = video.video_url.as_deref() else {
            return Ok(video);
        };

        let object: StorageObjectRef = encoded
            .parse()
            .map_err(|err| UploadError::SigningFailed(Box::new(err)))?;
        let url = self
            .objects
            .sign(&object, self.settings.signed_url_ttl)
            .await
            .map_err(|err| UploadError::SigningFailed(Box::new(err)))?;

        video.video_url = Some(url);
        Ok(video)
    }

    pub async fn upload_video(&self, request: UploadRequest) -> Result<Video, UploadError> {
        let mut run = PipelineRun::start("video", request.video_id);
        let outcome = self.video_pipeline(&mut run, request).await;
        run.settle(outcome)
    }

    pub async fn upload_thumbnail(&self, request: UploadRequest) -> Result<Video, UploadError> {
        let mut run = PipelineRun::start("thumbnail", request.video_id);
        let outcome = self.thumbnail_pipeline(&mut run, request).await;
        run.settle(outcome)
    }

    async fn video_pipeline(
        &self,
        run: &mut PipelineRun,
        request: UploadRequest,
    ) -> Result<Video, UploadError> {
        let UploadRequest {
            video_id,
            user_id,
            body,
        } = request;
        let target = self.settings.video;

        let mut video = self.authorize(video_id, user_id).await?;

        run.enter(Stage::Ingesting);
        let mut multipart = open_multipart(body, &target).await?;
        let (upload, media_type) = ingest_file_field(&mut multipart, &target, &self.scratch).await?;
        drop(multipart);

        run.enter(Stage::Validating);
        ensure_non_empty(&upload)?;

        run.enter(Stage::Remuxing);
        let reserved = self.scratch.reserve("mp4")?;
        let output_path = reserved.to_path_buf();
        self.remuxer
            .remux(upload.path(), &reserved)
            .await
            .map_err(UploadError::RemuxFailed)?;
        let processed = match ScratchArtifact::adopt(reserved).await {
            Ok(artifact) => artifact,
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::UnexpectedEof) => {
                return Err(UploadError::RemuxFailed(MediaToolError::EmptyOutput(
                    output_path,
                )));
            }
            Err(err) => return Err(err.into()),
        };
        drop(upload);

        run.enter(Stage::Classifying);
        let class = classify(self.probe.as_ref(), processed.path())
            .await
            .map_err(probe_failure)?;

        run.enter(Stage::Uploading);
        let key = video_object_key(class);
        debug!(video_id = %video_id, bucket = self.objects.bucket(), key = %key, "uploading video");
        let object = self
            .objects
            .upload(processed.path(), &key, media_type.essence_str())
            .await
            .map_err(UploadError::UploadFailed)?;
        info!(
            video_id = %video_id,
            bucket = %object.bucket,
            key = %object.key,
            size_bytes = processed.size(),
            class = %class,
            "video stored"
        );
        drop(processed);

        run.enter(Stage::Committing);
        video.video_url = Some(object.encode());
        let stored = match self.videos.update(&video).await {
            Ok(stored) => stored,
            Err(err) => {
                self.discard_object(&object).await;
                return Err(UploadError::Metadata(err));
            }
        };

        self.sign_video(stored).await
    }

    async fn thumbnail_pipeline(
        &self,
        run: &mut PipelineRun,
        request: UploadRequest,
    ) -> Result<Video, UploadError> {
        let UploadRequest {
            video_id,
            user_id,
            body,
        } = request;
        let target = self.settings.thumbnail;

        let mut video = self.authorize(video_id, user_id).await?;

        run.enter(Stage::Ingesting);
        let mut multipart = open_multipart(body, &target).await?;
        let (upload, media_type) = ingest_file_field(&mut multipart, &target, &self.scratch).await?;
        drop(multipart);

        run.enter(Stage::Validating);
        ensure_non_empty(&upload)?;

        run.enter(Stage::Uploading);
        let suffix: [u8; 32] = rand::random();
        let name = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(suffix),
            extension_for(&media_type)
        );
        tokio::fs::create_dir_all(&self.settings.assets_dir).await?;
        let dest = self.settings.assets_dir.join(&name);
        let size_bytes = upload.size();
        upload.persist(&dest).await?;
        info!(video_id = %video_id, path = %dest.display(), size_bytes, "thumbnail published");

        run.enter(Stage::Committing);
        video.thumbnail_url = Some(format!("{}/assets/{}", self.settings.public_base_url, name));
        let stored = match self.videos.update(&video).await {
            Ok(stored) => stored,
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_file(&dest).await {
                    warn!(path = %dest.display(), error = %remove_err, "failed to remove orphaned thumbnail");
                }
                return Err(UploadError::Metadata(err));
            }
        };

        self.sign_video(stored).await
    }

    /// Best-effort removal of an object whose record update failed.
    async fn discard_object(&self, object: &StorageObjectRef) {
        match self.objects.delete(object).await {
            Ok(()) => info!(bucket = %object.bucket, key = %object.key, "removed orphaned object"),
            Err(err) => warn!(
                bucket = %object.bucket,
                key = %object.key,
                error = %err,
                "failed to remove orphaned object"
            ),
        }
    }
}

fn ensure_non_empty(artifact: &ScratchArtifact) -> Result<(), UploadError> {
    if artifact.size() == 0 {
        return Err(UploadError::MalformedUpload("uploaded file is empty".into()));
    }
    Ok(())
}
