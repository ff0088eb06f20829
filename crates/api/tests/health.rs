//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::http::StatusCode;
use common::{assert_installed, body_json, get, install_zip, zip_bytes};
use sqlx::SqlitePool;

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_check_returns_ok_with_json(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let response = get(test.app.clone(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["registered_modules"], 0);
    assert_eq!(json["mounted_modules"], 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_counts_installed_and_mounted_modules(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let zip = zip_bytes(
        &test,
        "demo.zip",
        &[
            ("module.json", br#"{"name":"Demo"}"#.as_slice()),
            ("backend/routes.json", common::ping_routes()),
        ],
    );
    assert_installed(&install_zip(&test, "demo.zip", &zip).await);

    let json = body_json(get(test.app.clone(), "/health").await).await;
    assert_eq!(json["registered_modules"], 1);
    assert_eq!(json["mounted_modules"], 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_route_returns_404(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let response = get(test.app.clone(), "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn response_contains_x_request_id_header(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let response = get(test.app.clone(), "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}
