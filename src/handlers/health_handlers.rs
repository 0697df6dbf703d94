//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and scratch I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Round-trips the metadata store (`SELECT 1` for SQLite).
/// 2. Performs a write/read/delete inside the scratch directory uploads use.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.videos.ping().await {
        Ok(()) => (true, None::<String>),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let probe_path = state
        .uploads
        .scratch()
        .path()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let scratch_check = match fs::write(&probe_path, b"readyz").await {
        Ok(_) => {
            let read = fs::read(&probe_path).await;
            let removed = fs::remove_file(&probe_path).await;
            match (read, removed) {
                (Ok(bytes), Ok(())) if bytes == b"readyz" => (true, None),
                (Ok(bytes), Err(e)) if bytes == b"readyz" => {
                    (false, Some(format!("could not remove probe file: {}", e)))
                }
                (Ok(_), _) => (false, Some("file content mismatch".to_string())),
                (Err(e), _) => (false, Some(format!("could not read probe file: {}", e))),
            }
        }
        Err(e) => (false, Some(format!("could not write probe file: {}", e))),
    };

    let overall_ok = store_check.0 && scratch_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "metadata",
        CheckStatus {
            ok: store_check.0,
            error: store_check.1,
        },
    );
    checks.insert(
        "scratch",
        CheckStatus {
            ok: scratch_check.0,
            error: scratch_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
