//! Represents a video record owned by a single user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A video's metadata record.
///
/// The record never holds media bytes. `video_url` stores an encoded
/// [`StorageObjectRef`](super::object_ref::StorageObjectRef) (`bucket,key`)
/// and is rewritten to a presigned URL whenever it leaves the service.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Video {
    /// Unique identifier, also used as the route parameter.
    pub id: Uuid,

    /// When the draft was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,

    pub title: String,

    pub description: String,

    /// Owner of the record. Only this user may mutate it.
    pub user_id: Uuid,

    /// Public URL of the published thumbnail, if any.
    pub thumbnail_url: Option<String>,

    /// Object storage reference of the published video, if any.
    pub video_url: Option<String>,
}

/// Request body for `POST /api/videos`.
#[derive(Deserialize, Clone, Debug)]
pub struct NewVideo {
    pub title: String,
    #[serde(default)]
    pub description: String,
}
