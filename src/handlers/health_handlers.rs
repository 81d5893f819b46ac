//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and object-store I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const PROBE_PAYLOAD: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe - always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
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
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Writes, reads back and deletes a probe object through the object store.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let objects = state.files.objects();
    let key = format!("_readyz/{}", Uuid::new_v4());
    let object_check = match objects
        .put(
            &key,
            "application/octet-stream",
            Bytes::from_static(PROBE_PAYLOAD),
            PROBE_PAYLOAD.len() as i64,
        )
        .await
    {
        Ok(()) => {
            let read = objects.get(&key).await;
            let removed = objects.delete(&key).await;
            match (read, removed) {
                (Ok(obj), Ok(_)) if obj.data.as_ref() == PROBE_PAYLOAD => CheckStatus::ok(),
                (Ok(_), Err(e)) => CheckStatus::failed(format!("could not remove probe: {}", e)),
                (Ok(_), Ok(_)) => CheckStatus::failed("probe content mismatch".into()),
                (Err(e), _) => CheckStatus::failed(format!("could not read probe: {}", e)),
            }
        }
        Err(e) => CheckStatus::failed(format!("could not write probe: {}", e)),
    };

    let overall_ok = sqlite_check.ok && object_check.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("object_store", object_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
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

impl CheckStatus {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
