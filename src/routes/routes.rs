//! Defines routes for the file service.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Files** (session cookie required)
//!   - `POST   /api/files`            - upload (multipart `file`)
//!   - `POST   /api/files/list`       - list own files (JSON body)
//!   - `GET    /api/files/{id}`       - download
//!   - `POST   /api/files/{id}`       - overwrite content (multipart `file`)
//!   - `DELETE /api/files/{id}`       - soft-delete
//!   - `GET    /api/files/{id}/meta`  - metadata
//!   - `POST   /api/files/{id}/name`  - rename (JSON `{"filename": ...}`)

use crate::{
    handlers::{
        file_handlers::{
            delete_file, get_file, get_metadata, list_files, rename_file, update_file,
            upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Request bodies are capped at `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file endpoints
        .route("/api/files", post(upload_file))
        .route("/api/files/list", post(list_files))
        .route(
            "/api/files/{id}",
            get(get_file).post(update_file).delete(delete_file),
        )
        .route("/api/files/{id}/meta", get(get_metadata))
        .route("/api/files/{id}/name", post(rename_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        handlers::auth::SESSION_COOKIE,
        models::file::FileRecord,
        services::{
            lifecycle::LifecycleCoordinator, metadata_store::SqliteMetadataStore,
            object_store::DiskObjectStore, session_store::SqliteSessionStore,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-DRIVE-BOUNDARY";

    struct TestApp {
        _dir: tempfile::TempDir,
        router: Router,
        sessions: SqliteSessionStore,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(memory_pool().await);
            let sessions = SqliteSessionStore::new(db.clone(), chrono::Duration::hours(1));
            let files = LifecycleCoordinator::new(
                Arc::new(SqliteMetadataStore::new(db.clone())),
                Arc::new(DiskObjectStore::new(dir.path())),
                Duration::from_secs(5),
            );
            let state = AppState {
                files,
                sessions: Arc::new(sessions.clone()),
                db,
            };
            Self {
                _dir: dir,
                router: routes(1024 * 1024).with_state(state),
                sessions,
            }
        }

        async fn login(&self, user: i64) -> String {
            let token = self.sessions.create_session(user).await.unwrap();
            format!("{}={}", SESSION_COOKIE, token)
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn upload(&self, cookie: &str, filename: &str, content_type: &str, data: &[u8]) -> Response {
            self.send(multipart_request("POST", "/api/files", cookie, filename, content_type, data))
                .await
        }
    }

    fn multipart_request(
        method: &str,
        uri: &str,
        cookie: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, cookie: &str, json: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_bytes(response: Response) -> bytes::Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    async fn uploaded_record(response: Response) -> FileRecord {
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = TestApp::new().await;
        let response = app
            .send(Request::get("/healthz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_checks_both_stores() {
        let app = TestApp::new().await;
        let response = app
            .send(Request::get("/readyz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["object_store"]["ok"], true);
    }

    #[tokio::test]
    async fn missing_or_unknown_session_is_unauthorized() {
        let app = TestApp::new().await;
        let no_cookie = Request::builder()
            .method("POST")
            .uri("/api/files/list")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(app.send(no_cookie).await.status(), StatusCode::UNAUTHORIZED);

        let bogus = format!("{}=not-a-session", SESSION_COOKIE);
        let response = app.upload(&bogus, "a.txt", "text/plain", b"ab").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_then_download() {
        let app = TestApp::new().await;
        let cookie = app.login(7).await;

        let record = uploaded_record(app.upload(&cookie, "a.txt", "text/plain", b"ab").await).await;
        assert_eq!(record.owner_id, 7);
        assert_eq!(record.size, 2);
        assert_eq!(record.filename, "a.txt");

        let response = app
            .send(empty_request("GET", &format!("/api/files/{}", record.id), &cookie))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''a.txt"
        );
        assert_eq!(body_bytes(response).await.as_ref(), b"ab");
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        let app = TestApp::new().await;
        let cookie = app.login(1).await;
        let response = app
            .send(empty_request("GET", "/api/files/not-a-uuid", &cookie))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_user_is_forbidden() {
        let app = TestApp::new().await;
        let owner = app.login(1).await;
        let intruder = app.login(2).await;
        let record = uploaded_record(app.upload(&owner, "a.txt", "text/plain", b"ab").await).await;

        let response = app
            .send(empty_request("GET", &format!("/api/files/{}", record.id), &intruder))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .send(multipart_request(
                "POST",
                &format!("/api/files/{}", record.id),
                &intruder,
                "a.txt",
                "text/plain",
                b"overwritten",
            ))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn overwrite_rename_delete_flow() {
        let app = TestApp::new().await;
        let cookie = app.login(7).await;
        let record = uploaded_record(app.upload(&cookie, "a.txt", "text/plain", b"ab").await).await;
        let file_uri = format!("/api/files/{}", record.id);

        let response = app
            .send(multipart_request("POST", &file_uri, &cookie, "ignored", "text/plain", b"c"))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let name_uri = format!("{}/name", file_uri);
        let too_long = format!(r#"{{"filename":"{}"}}"#, "n".repeat(51));
        let response = app.send(json_request("POST", &name_uri, &cookie, &too_long)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send(json_request("POST", &name_uri, &cookie, r#"{"filename":"b.txt"}"#))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .send(empty_request("GET", &format!("{}/meta", file_uri), &cookie))
            .await;
        let meta: FileRecord = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(meta.filename, "b.txt");
        assert_eq!(meta.size, 1);

        let response = app.send(empty_request("DELETE", &file_uri, &cookie)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.send(empty_request("GET", &file_uri, &cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .send(json_request("POST", "/api/files/list", &cookie, r#"{"with_deleted":true}"#))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let listed: Vec<FileRecord> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_deleted);
    }

    #[tokio::test]
    async fn oversized_filename_upload_is_rejected() {
        let app = TestApp::new().await;
        let cookie = app.login(1).await;
        let name = "x".repeat(51);
        let response = app.upload(&cookie, &name, "text/plain", b"ab").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send(json_request("POST", "/api/files/list", &cookie, r#"{"with_deleted":true}"#))
            .await;
        let listed: Vec<FileRecord> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request_envelope() {
        let app = TestApp::new().await;
        let cookie = app.login(1).await;
        let record = uploaded_record(app.upload(&cookie, "a.txt", "text/plain", b"ab").await).await;

        let requests = [
            json_request("POST", "/api/files/list", &cookie, r#"{"limit":"many"}"#),
            json_request("POST", &format!("/api/files/{}/name", record.id), &cookie, "{"),
        ];
        for request in requests {
            let response = app.send(request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value =
                serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(body["status"], 400);
            assert!(body["error"].as_str().unwrap().starts_with("Bad JSON"));
        }

        let meta = app
            .send(empty_request("GET", &format!("/api/files/{}/meta", record.id), &cookie))
            .await;
        let meta: FileRecord = serde_json::from_slice(&body_bytes(meta).await).unwrap();
        assert_eq!(meta.filename, "a.txt");
    }
}
