//! Shared setup for integration tests: an in-memory SQLite store, fake media
//! tools, in-memory object storage and an `axum-test` server over the real
//! router.

#![allow(dead_code)]

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tubely::{
    config::AppConfig,
    models::{
        object_ref::StorageObjectRef,
        video::{NewVideo, Video},
    },
    services::{
        auth::Authenticator,
        media_tools::{MediaToolError, Probe, Remuxer},
        object_storage::{ObjectStorage, ObjectStorageError, S3ObjectStorage},
        scratch::ScratchDir,
        upload_service::{UploadService, UploadSettings},
        video_store::{SqliteVideoStore, VideoStore, VideoStoreError, run_migrations},
    },
    state::AppState,
};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-secret";
pub const BUCKET: &str = "tubely-test";
pub const PUBLIC_BASE_URL: &str = "http://localhost:8091";

pub const LANDSCAPE_REPORT: &str = r#"{"streams":[{"index":0,"width":1920,"height":1080}]}"#;
pub const PORTRAIT_REPORT: &str = r#"{"streams":[{"index":0,"width":1080,"height":1920}]}"#;
pub const EMPTY_REPORT: &str = r#"{"streams":[]}"#;

/// Copies its input, standing in for `ffmpeg -c copy -movflags faststart`.
#[derive(Default)]
pub struct FakeRemuxer {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub hang: bool,
}

#[async_trait]
impl Remuxer for FakeRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), MediaToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail {
            return Err(MediaToolError::Spawn {
                program: "fake-ffmpeg".into(),
                source: io::Error::other("remux refused"),
            });
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|source| MediaToolError::Spawn {
                program: "fake-ffmpeg".into(),
                source,
            })?;
        Ok(())
    }
}

/// Returns a canned ffprobe report.
pub struct FakeProbe {
    pub report: String,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(report: &str) -> Self {
        Self {
            report: report.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(&self, _input: &Path) -> Result<Vec<u8>, MediaToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.report.as_bytes().to_vec())
    }
}

/// Keeps uploaded objects in memory; signs with the real S3 presigner over
/// static credentials so URLs look exactly like production ones.
pub struct MemoryObjectStorage {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub deleted: Mutex<Vec<String>>,
    pub upload_attempts: AtomicUsize,
    fail_uploads: bool,
    signer: S3ObjectStorage,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::with_failing_uploads(false)
    }

    pub fn with_failing_uploads(fail_uploads: bool) -> Self {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                "AKIDTUBELYTEST",
                "tubely-test-secret-key",
                None,
                None,
                "static",
            ))
            .force_path_style(true)
            .build();
        Self {
            objects: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            upload_attempts: AtomicUsize::new(0),
            fail_uploads,
            signer: S3ObjectStorage::with_client(
                aws_sdk_s3::Client::from_conf(config),
                BUCKET.to_string(),
            ),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    fn bucket(&self) -> &str {
        BUCKET
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        _content_type: &str,
    ) -> Result<StorageObjectRef, ObjectStorageError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads {
            return Err(ObjectStorageError::UploadFailed {
                bucket: BUCKET.into(),
                key: key.into(),
                reason: "connection reset".into(),
            });
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ObjectStorageError::UploadFailed {
                bucket: BUCKET.into(),
                key: key.into(),
                reason: e.to_string(),
            })?;
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(StorageObjectRef::new(BUCKET, key))
    }

    async fn sign(
        &self,
        object: &StorageObjectRef,
        ttl: Duration,
    ) -> Result<String, ObjectStorageError> {
        self.signer.sign(object, ttl).await
    }

    async fn delete(&self, object: &StorageObjectRef) -> Result<(), ObjectStorageError> {
        self.objects.lock().unwrap().remove(&object.key);
        self.deleted.lock().unwrap().push(object.key.clone());
        Ok(())
    }
}

/// Delegates reads to SQLite but fails every update.
pub struct FailingUpdateStore {
    pub inner: SqliteVideoStore,
}

#[async_trait]
impl VideoStore for FailingUpdateStore {
    async fn create(&self, owner: Uuid, draft: NewVideo) -> Result<Video, VideoStoreError> {
        self.inner.create(owner, draft).await
    }

    async fn get(&self, id: Uuid) -> Result<Video, VideoStoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, _video: &Video) -> Result<Video, VideoStoreError> {
        Err(VideoStoreError::Sqlx(sqlx::Error::PoolTimedOut))
    }

    async fn ping(&self) -> Result<(), VideoStoreError> {
        self.inner.ping().await
    }
}

pub struct TestAppBuilder {
    probe_report: String,
    fail_remux: bool,
    hang_remux: bool,
    fail_commit: bool,
    fail_upload: bool,
    max_video_bytes: u64,
}

impl TestAppBuilder {
    pub fn probe_report(mut self, report: &str) -> Self {
        self.probe_report = report.to_string();
        self
    }

    pub fn failing_remux(mut self) -> Self {
        self.fail_remux = true;
        self
    }

    pub fn hanging_remux(mut self) -> Self {
        self.hang_remux = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn max_video_bytes(mut self, limit: u64) -> Self {
        self.max_video_bytes = limit;
        self
    }

    pub async fn spawn(self) -> TestApp {
        let dir = tempfile::tempdir().expect("temp dir");
        let assets_dir = dir.path().join("assets");
        let scratch_root = dir.path().join("scratch");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        run_migrations(&pool).await.expect("migrations");
        let sqlite = SqliteVideoStore::new(Arc::new(pool));

        let videos: Arc<dyn VideoStore> = if self.fail_commit {
            Arc::new(FailingUpdateStore {
                inner: sqlite.clone(),
            })
        } else {
            Arc::new(sqlite.clone())
        };

        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: "sqlite::memory:".into(),
            assets_dir: assets_dir.to_string_lossy().into_owned(),
            scratch_root: scratch_root.to_string_lossy().into_owned(),
            public_base_url: format!("{PUBLIC_BASE_URL}/"),
            jwt_secret: JWT_SECRET.into(),
            s3_bucket: BUCKET.into(),
            s3_region: "us-east-1".into(),
            s3_endpoint: None,
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            max_video_bytes: self.max_video_bytes,
            max_thumbnail_bytes: 1 << 20,
            max_form_field_bytes: 1 << 10,
            signed_url_ttl_secs: 900,
        };

        let scratch = ScratchDir::create_in(&scratch_root).expect("scratch dir");
        let objects = Arc::new(MemoryObjectStorage::with_failing_uploads(self.fail_upload));
        let remuxer = Arc::new(FakeRemuxer {
            calls: AtomicUsize::new(0),
            fail: self.fail_remux,
            hang: self.hang_remux,
        });
        let probe = Arc::new(FakeProbe::new(&self.probe_report));

        let uploads = UploadService::new(
            videos.clone(),
            objects.clone(),
            remuxer.clone(),
            probe.clone(),
            scratch.clone(),
            UploadSettings::from_config(&config),
        );
        let auth = Authenticator::new(JWT_SECRET);
        let state = AppState {
            auth: auth.clone(),
            videos,
            uploads: uploads.clone(),
        };
        let server = TestServer::new(tubely::app(state)).expect("test server");

        TestApp {
            server,
            uploads,
            store: sqlite,
            objects,
            remuxer,
            probe,
            scratch,
            auth,
            assets_dir,
            _dir: dir,
        }
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub uploads: UploadService,
    /// Direct handle on the backing SQLite store, bypassing any failure
    /// injection.
    pub store: SqliteVideoStore,
    pub objects: Arc<MemoryObjectStorage>,
    pub remuxer: Arc<FakeRemuxer>,
    pub probe: Arc<FakeProbe>,
    pub scratch: ScratchDir,
    pub auth: Authenticator,
    pub assets_dir: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            probe_report: LANDSCAPE_REPORT.to_string(),
            fail_remux: false,
            hang_remux: false,
            fail_commit: false,
            fail_upload: false,
            max_video_bytes: 1 << 20,
        }
    }

    pub async fn spawn() -> Self {
        Self::builder().spawn().await
    }

    pub fn token_for(&self, user: Uuid) -> String {
        self.auth
            .issue(user, Duration::from_secs(3600))
            .expect("issue token")
    }

    /// Create a draft owned by `owner` straight in the store.
    pub async fn draft_for(&self, owner: Uuid) -> Video {
        self.store
            .create(
                owner,
                NewVideo {
                    title: "boots".into(),
                    description: "a short clip".into(),
                },
            )
            .await
            .expect("create draft")
    }

    pub async fn scratch_entries(&self) -> Vec<PathBuf> {
        self.scratch.entries().await.expect("list scratch")
    }

    pub fn remux_calls(&self) -> usize {
        self.remuxer.calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe.calls.load(Ordering::SeqCst)
    }
}

pub fn video_form(bytes: Vec<u8>, mime_type: &str) -> MultipartForm {
    MultipartForm::new()
        .add_text("title", "ignored")
        .add_part(
            "video",
            Part::bytes(bytes).file_name("clip.mp4").mime_type(mime_type),
        )
}

pub fn thumbnail_form(bytes: Vec<u8>, mime_type: &str) -> MultipartForm {
    MultipartForm::new().add_part(
        "thumbnail",
        Part::bytes(bytes).file_name("thumb").mime_type(mime_type),
    )
}

/// Bytes that look enough like an MP4 for the fakes.
pub fn sample_mp4() -> Vec<u8> {
    let mut bytes = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00mp42isom".to_vec();
    bytes.extend(std::iter::repeat_n(0xAB, 4096));
    bytes
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
