pub mod auth;
pub mod intake;
pub mod media_tools;
pub mod object_storage;
pub mod scratch;
pub mod upload_service;
pub mod video_store;
