#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use modhost_api::config::ServerConfig;
use modhost_api::lifecycle::jobs::{InstallJob, InstallStage};
use modhost_api::router::build_app_router;
use modhost_api::state::AppState;
use modhost_core::archive::write_archive;

const BOUNDARY: &str = "modhost-test-boundary";

/// A running test application and the temporary tree it writes into.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    /// Dropped last; removes every module directory the test created.
    pub dir: TempDir,
}

/// Build a test `ServerConfig` rooted in `base`.
///
/// The deferred re-mount is disabled so tests only see the mounts they
/// trigger themselves.
pub fn test_config(base: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        database_url: "sqlite::memory:".to_string(),
        upload_dir: base.join("uploads"),
        staging_dir: base.join("staging"),
        server_modules_dir: base.join("server-modules"),
        client_modules_dir: base.join("client-modules"),
        max_upload_bytes: 8 * 1024 * 1024,
        max_archive_bytes: 16 * 1024 * 1024,
        max_archive_entries: 1000,
        script_timeout_secs: 10,
        remount_delay_ms: 0,
    }
}

/// Build the full application router over `pool` with a fresh temp tree.
pub fn build_test_app(pool: SqlitePool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    config.ensure_directories().unwrap();

    let state = AppState::new(pool, config.clone());
    let app = build_app_router(state.clone(), &config);

    TestApp { app, state, dir }
}

/// Write a zip fixture into the test tree and return its bytes.
pub fn zip_bytes(test: &TestApp, name: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let path = test.dir.path().join(name);
    write_archive(&path, entries).unwrap();
    std::fs::read(&path).unwrap()
}

/// A `routes.json` with a single static `GET /ping`.
pub fn ping_routes() -> &'static [u8] {
    br#"{"routes":[{"method":"GET","path":"/ping","handler":{"kind":"static","body":{"pong":true}}}]}"#
}

/// Multipart body carrying one file in the `module` field.
pub fn multipart_body(file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"module\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn upload(app: Router, file_name: &str, content_type: &str, data: &[u8]) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/modules/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(file_name, content_type, data)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Upload a zip and wait for its install job to finish.
pub async fn install_zip(test: &TestApp, file_name: &str, data: &[u8]) -> InstallJob {
    let response = upload(test.app.clone(), file_name, "application/zip", data).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let job_id: Uuid = json["data"]["job_id"].as_str().unwrap().parse().unwrap();
    wait_for_job(&test.state, job_id).await
}

/// Poll the job tracker until the job reaches a terminal stage.
pub async fn wait_for_job(state: &AppState, job_id: Uuid) -> InstallJob {
    for _ in 0..400 {
        if let Some(job) = state.jobs.get(job_id).await {
            if job.stage.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("install job {job_id} did not finish");
}

pub fn assert_installed(job: &InstallJob) {
    assert_eq!(job.stage, InstallStage::Mounted, "job failed: {:?}", job.error);
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, Body::empty()).await
}

pub async fn send(app: Router, method: Method, uri: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn send_json(app: Router, method: Method, uri: &str, json: Value) -> Response {
    send(app, method, uri, Body::from(json.to_string())).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
