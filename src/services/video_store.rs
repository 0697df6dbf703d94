//! Video metadata persisted in SQLite.

use crate::models::video::{NewVideo, Video};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum VideoStoreError {
    #[error("video `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type VideoStoreResult<T> = Result<T, VideoStoreError>;

/// Record store for videos. Updates replace the whole record; the last
/// writer wins.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn create(&self, owner: Uuid, draft: NewVideo) -> VideoStoreResult<Video>;

    async fn get(&self, id: Uuid) -> VideoStoreResult<Video>;

    /// Write every mutable column of `video` and return the stored record.
    async fn update(&self, video: &Video) -> VideoStoreResult<Video>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> VideoStoreResult<()>;
}

#[derive(Clone, Debug)]
pub struct SqliteVideoStore {
    db: Arc<SqlitePool>,
}

impl SqliteVideoStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    async fn create(&self, owner: Uuid, draft: NewVideo) -> VideoStoreResult<Video> {
        let now = Utc::now();
        let video = sqlx::query_as::<_, Video>(
            "INSERT INTO videos (id, created_at, updated_at, title, description, user_id)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, created_at, updated_at, title, description, user_id,
                       thumbnail_url, video_url",
        )
        .bind(Uuid::new_v4())
        .bind(now)
        .bind(now)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(owner)
        .fetch_one(&*self.db)
        .await?;

        debug!(video_id = %video.id, user_id = %owner, "created video draft");
        Ok(video)
    }

    async fn get(&self, id: Uuid) -> VideoStoreResult<Video> {
        sqlx::query_as::<_, Video>(
            "SELECT id, created_at, updated_at, title, description, user_id,
                    thumbnail_url, video_url
             FROM videos WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(VideoStoreError::NotFound(id))
    }

    async fn update(&self, video: &Video) -> VideoStoreResult<Video> {
        sqlx::query_as::<_, Video>(
            "UPDATE videos
             SET title = ?, description = ?, thumbnail_url = ?, video_url = ?, updated_at = ?
             WHERE id = ?
             RETURNING id, created_at, updated_at, title, description, user_id,
                       thumbnail_url, video_url",
        )
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(&video.video_url)
        .bind(Utc::now())
        .bind(video.id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(VideoStoreError::NotFound(video.id))
    }

    async fn ping(&self) -> VideoStoreResult<()> {
        sqlx::query("SELECT 1").execute(&*self.db).await?;
        Ok(())
    }
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteVideoStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteVideoStore::new(Arc::new(pool))
    }

    fn draft(title: &str) -> NewVideo {
        NewVideo {
            title: title.into(),
            description: "".into(),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = memory_store().await;
        let owner = Uuid::new_v4();

        let created = store.create(owner, draft("boots")).await.unwrap();
        assert_eq!(created.user_id, owner);
        assert_eq!(created.video_url, None);

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn update_replaces_mutable_columns() {
        let store = memory_store().await;
        let mut video = store.create(Uuid::new_v4(), draft("boots")).await.unwrap();

        video.video_url = Some("tubely-media,landscape/abc.mp4".into());
        video.thumbnail_url = Some("http://localhost/assets/t.png".into());
        let updated = store.update(&video).await.unwrap();

        assert_eq!(updated.video_url, video.video_url);
        assert_eq!(updated.thumbnail_url, video.thumbnail_url);
        assert!(updated.updated_at >= video.updated_at);
        assert_eq!(store.get(video.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(VideoStoreError::NotFound(got)) if got == id));

        let mut ghost = store.create(Uuid::new_v4(), draft("ghost")).await.unwrap();
        ghost.id = id;
        assert!(matches!(
            store.update(&ghost).await,
            Err(VideoStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn migrations_are_repeatable() {
        let store = memory_store().await;
        run_migrations(&store.db).await.unwrap();
        store.ping().await.unwrap();
    }
}
