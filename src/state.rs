//! Shared application state handed to every handler.

use crate::services::{
    auth::Authenticator, upload_service::UploadService, video_store::VideoStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub auth: Authenticator,
    pub videos: Arc<dyn VideoStore>,
    pub uploads: UploadService,
}
