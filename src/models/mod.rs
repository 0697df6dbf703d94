//! Core data models for the video ingest service.
//!
//! `Video` maps to the `videos` table via `sqlx::FromRow` and serializes as
//! the JSON body returned to clients. The other types only exist while a
//! pipeline run is in flight.

pub mod geometry;
pub mod object_ref;
pub mod video;
