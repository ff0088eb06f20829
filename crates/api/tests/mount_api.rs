//! Integration tests for module route mounting and dispatch.

mod common;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use common::{assert_installed, body_json, get, install_zip, send, send_json, zip_bytes};
use serde_json::json;
use sqlx::SqlitePool;

const TODO_ROUTES: &[u8] = br#"{
    "routes": [
        {"method": "GET", "path": "/ping", "handler": {"kind": "static", "body": {"pong": true}}},
        {"method": "POST", "path": "/echo/{word}", "handler": {"kind": "script", "script": "echo.sh"}}
    ],
    "collections": [{"name": "todos", "required": ["title"]}]
}"#;

const ECHO_SCRIPT: &[u8] = b"#!/bin/sh\ncat\n";

async fn install_todo_module(test: &common::TestApp) -> String {
    let zip = zip_bytes(
        test,
        "todo.zip",
        &[
            ("module.json", br#"{"name":"Todo"}"#),
            ("backend/routes.json", TODO_ROUTES),
            ("backend/echo.sh", ECHO_SCRIPT),
        ],
    );
    let job = install_zip(test, "todo.zip", &zip).await;
    assert_installed(&job);
    job.module_path
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_mount_returns_404(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let response = get(test.app.clone(), "/api/v1/modules/1-abc-nothing/ping").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn reload_twice_keeps_mount_table(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let module_path = install_todo_module(&test).await;
    let before = test.state.registry.snapshot().await;

    let response = send(
        test.app.clone(),
        Method::POST,
        "/api/v1/modules/any/reload",
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["message"], "Modules reloaded successfully");
    assert_eq!(json["data"]["report"]["unchanged"], json!([module_path]));
    assert_eq!(json["data"]["report"]["mounted"], json!([]));

    let after = test.state.registry.snapshot().await;
    assert_eq!(before, after);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn mounts_endpoint_lists_bound_routes(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let module_path = install_todo_module(&test).await;

    let response = get(test.app.clone(), "/api/v1/modules/mounts").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let mounts = json["data"].as_array().unwrap();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0]["path"], module_path.as_str());
    // ping, echo, and five collection routes
    assert_eq!(mounts[0]["routes"].as_array().unwrap().len(), 7);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn script_route_receives_request_on_stdin(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let module_path = install_todo_module(&test).await;

    let response = send_json(
        test.app.clone(),
        Method::POST,
        &format!("/api/v1/modules/{module_path}/echo/hello?loud=yes"),
        json!({ "n": 1 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["module"], module_path.as_str());
    assert_eq!(json["method"], "POST");
    assert_eq!(json["path"], "/echo/hello");
    assert_eq!(json["params"]["word"], "hello");
    assert_eq!(json["query"]["loud"], "yes");
    assert_eq!(json["body"]["n"], 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn collection_crud(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let module_path = install_todo_module(&test).await;
    let base = format!("/api/v1/modules/{module_path}/todos");

    // Required field missing.
    let response = send_json(test.app.clone(), Method::POST, &base, json!({ "done": false })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send_json(
        test.app.clone(),
        Method::POST,
        &base,
        json!({ "title": "write tests", "done": false }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(created["data"]["data"]["title"], "write tests");

    let response = send_json(
        test.app.clone(),
        Method::PUT,
        &format!("{base}/{id}"),
        json!({ "done": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["data"]["data"]["title"], "write tests");
    assert_eq!(updated["data"]["data"]["done"], true);

    let response = get(test.app.clone(), &base).await;
    let listed = body_json(response).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let response = send(
        test.app.clone(),
        Method::DELETE,
        &format!("{base}/{id}"),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(test.app.clone(), &format!("{base}/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn deleted_module_is_no_longer_routable(pool: SqlitePool) {
    let test = common::build_test_app(pool);
    let module_path = install_todo_module(&test).await;
    let ping = format!("/api/v1/modules/{module_path}/ping");

    let response = get(test.app.clone(), &ping).await;
    assert_eq!(response.status(), StatusCode::OK);

    let module = modhost_db::repositories::ModuleRepo::find_by_path(&test.state.pool, &module_path)
        .await
        .unwrap()
        .unwrap();
    let response = send(
        test.app.clone(),
        Method::DELETE,
        &format!("/api/v1/modules/{}", module.id),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(test.app.clone(), &ping).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
