//! Request handlers for module-defined routes.
//!
//! [`build_module_router`] turns a validated [`RouteDefinition`] into a
//! self-contained [`Router`] whose handlers close over the module's
//! [`ModuleContext`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, RawPathParams};
use axum::http::{Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{MethodFilter, MethodRouter};
use axum::{Json, Router};
use modhost_core::error::CoreError;
use modhost_core::route_definition::{CollectionSpec, HandlerSpec, RouteDefinition};
use modhost_core::runtime::{run_script, ScriptContext};
use modhost_core::types::DbId;
use modhost_db::models::document::CreateModuleDocument;
use modhost_db::repositories::DocumentRepo;
use modhost_db::DbPool;
use serde_json::{json, Map, Value};

use super::registry::MountError;
use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, MessageResponse};

/// Module-relative paths that collide with management routes (`/{id}`,
/// `/{id}/execute`, ...). The management router answers them for every
/// method; the module root stays reachable with a trailing slash.
const SHADOWED_PATHS: &[&str] = &["/", "/execute", "/reload", "/toggle"];

/// Everything a module's handlers need at request time.
#[derive(Debug)]
pub struct ModuleContext {
    pub module_path: String,
    /// The module's directory under the server module root.
    pub module_dir: PathBuf,
    pub pool: DbPool,
    pub script_timeout: Duration,
}

/// Build the router for one module.
pub fn build_module_router(
    definition: &RouteDefinition,
    ctx: Arc<ModuleContext>,
) -> Result<Router, MountError> {
    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for route in &definition.routes {
        let filter = method_filter(&ctx.module_path, &route.method)?;
        if SHADOWED_PATHS.contains(&route.path.as_str()) {
            tracing::warn!(
                module_path = %ctx.module_path,
                method = %route.method,
                path = %route.path,
                "Route is shadowed by a management route",
            );
        }

        let method_router = by_path
            .remove(&route.path)
            .unwrap_or_else(MethodRouter::new);
        let method_router = match &route.handler {
            HandlerSpec::Static { status, body } => {
                let status = StatusCode::from_u16(*status).map_err(|e| MountError::Build {
                    module: ctx.module_path.clone(),
                    reason: e.to_string(),
                })?;
                let body = body.clone();
                method_router.on(filter, move || {
                    let body = body.clone();
                    async move { (status, Json(body)) }
                })
            }
            HandlerSpec::Script {
                script,
                timeout_secs,
            } => {
                let script_path = ctx.module_dir.join(script);
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(ctx.script_timeout);
                let ctx = Arc::clone(&ctx);
                method_router.on(
                    filter,
                    move |params: RawPathParams,
                          Query(query): Query<HashMap<String, String>>,
                          method: Method,
                          uri: Uri,
                          body: Bytes| {
                        let ctx = Arc::clone(&ctx);
                        let script_path = script_path.clone();
                        async move {
                            let request = ScriptRequest {
                                method,
                                uri,
                                params,
                                query,
                                body,
                            };
                            run_route_script(&ctx, &script_path, timeout, request).await
                        }
                    },
                )
            }
        };
        by_path.insert(route.path.clone(), method_router);
    }

    for collection in &definition.collections {
        let spec = Arc::new(collection.clone());
        let (base, item) = collection_routes(&ctx, &spec);
        merge_into(&mut by_path, collection.base_path(), base);
        merge_into(&mut by_path, collection.item_path(), item);
    }

    let mut router = Router::new();
    for (path, method_router) in by_path {
        router = router.route(&path, method_router);
    }

    let module_path = ctx.module_path.clone();
    Ok(router.fallback(move |method: Method, uri: Uri| {
        let module_path = module_path.clone();
        async move {
            AppError::NotFound(format!(
                "Module '{module_path}' has no route for {method} {}",
                uri.path()
            ))
        }
    }))
}

fn method_filter(module_path: &str, method: &str) -> Result<MethodFilter, MountError> {
    let build_err = |reason: String| MountError::Build {
        module: module_path.to_string(),
        reason,
    };
    let method = Method::from_bytes(method.as_bytes()).map_err(|e| build_err(e.to_string()))?;
    MethodFilter::try_from(method).map_err(|e| build_err(e.to_string()))
}

fn merge_into(by_path: &mut BTreeMap<String, MethodRouter>, path: String, extra: MethodRouter) {
    let merged = match by_path.remove(&path) {
        Some(existing) => existing.merge(extra),
        None => extra,
    };
    by_path.insert(path, merged);
}

// ---------------------------------------------------------------------------
// Script routes
// ---------------------------------------------------------------------------

struct ScriptRequest {
    method: Method,
    uri: Uri,
    params: RawPathParams,
    query: HashMap<String, String>,
    body: Bytes,
}

/// Run a route script with the request on stdin.
///
/// JSON stdout becomes the response body; anything else is wrapped as
/// `{"output": "..."}`. A non-zero exit is a 502.
async fn run_route_script(
    ctx: &ModuleContext,
    script_path: &FsPath,
    timeout: Duration,
    request: ScriptRequest,
) -> AppResult<Json<Value>> {
    let params: Map<String, Value> = request
        .params
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    let body = if request.body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&request.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&request.body).into_owned()))
    };

    let payload = json!({
        "module": ctx.module_path,
        "method": request.method.as_str(),
        "path": request.uri.path(),
        "params": params,
        "query": request.query,
        "body": body,
    });

    let script_ctx = ScriptContext::new(&ctx.module_path, &ctx.module_dir, timeout);
    let output = run_script(script_path, &script_ctx, &payload)
        .await
        .map_err(|e| AppError::ScriptFailed(e.to_string()))?;

    tracing::debug!(
        module_path = %ctx.module_path,
        script = %script_path.display(),
        duration_ms = output.duration_ms,
        "Route script finished",
    );

    Ok(Json(output.into_body()))
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Method routers for a collection's base path and item path.
fn collection_routes(
    ctx: &Arc<ModuleContext>,
    spec: &Arc<CollectionSpec>,
) -> (MethodRouter, MethodRouter) {
    let base = {
        let (c1, s1) = (Arc::clone(ctx), Arc::clone(spec));
        let (c2, s2) = (Arc::clone(ctx), Arc::clone(spec));
        MethodRouter::new()
            .get(move || {
                let (ctx, spec) = (Arc::clone(&c1), Arc::clone(&s1));
                async move { list_documents(&ctx, &spec).await }
            })
            .post(move |Json(data): Json<Value>| {
                let (ctx, spec) = (Arc::clone(&c2), Arc::clone(&s2));
                async move { create_document(&ctx, &spec, data).await }
            })
    };

    let item = {
        let (c1, s1) = (Arc::clone(ctx), Arc::clone(spec));
        let (c2, s2) = (Arc::clone(ctx), Arc::clone(spec));
        let (c3, s3) = (Arc::clone(ctx), Arc::clone(spec));
        MethodRouter::new()
            .get(move |Path(id): Path<DbId>| {
                let (ctx, spec) = (Arc::clone(&c1), Arc::clone(&s1));
                async move { get_document(&ctx, &spec, id).await }
            })
            .put(move |Path(id): Path<DbId>, Json(patch): Json<Value>| {
                let (ctx, spec) = (Arc::clone(&c2), Arc::clone(&s2));
                async move { update_document(&ctx, &spec, id, patch).await }
            })
            .delete(move |Path(id): Path<DbId>| {
                let (ctx, spec) = (Arc::clone(&c3), Arc::clone(&s3));
                async move { delete_document(&ctx, &spec, id).await }
            })
    };

    (base, item)
}

fn not_found(id: DbId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Document",
        id,
    })
}

fn require_object(data: &Value) -> AppResult<&Map<String, Value>> {
    data.as_object().ok_or_else(|| {
        AppError::Core(CoreError::Validation(
            "Document body must be a JSON object".to_string(),
        ))
    })
}

/// GET /{collection}
async fn list_documents(ctx: &ModuleContext, spec: &CollectionSpec) -> AppResult<impl IntoResponse> {
    let docs = DocumentRepo::list(&ctx.pool, &ctx.module_path, &spec.name).await?;
    Ok(Json(DataResponse { data: docs }))
}

/// POST /{collection}
///
/// Rejects bodies that are not objects or lack a required field.
async fn create_document(
    ctx: &ModuleContext,
    spec: &CollectionSpec,
    data: Value,
) -> AppResult<impl IntoResponse> {
    let object = require_object(&data)?;
    let missing: Vec<&str> = spec
        .required
        .iter()
        .filter(|field| !object.get(field.as_str()).is_some_and(|v| !v.is_null()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Missing required field(s): {}",
            missing.join(", ")
        ))));
    }

    let doc = DocumentRepo::insert(
        &ctx.pool,
        &CreateModuleDocument {
            module_path: ctx.module_path.clone(),
            collection: spec.name.clone(),
            data,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: doc })))
}

/// GET /{collection}/{id}
async fn get_document(
    ctx: &ModuleContext,
    spec: &CollectionSpec,
    id: DbId,
) -> AppResult<impl IntoResponse> {
    let doc = DocumentRepo::find(&ctx.pool, &ctx.module_path, &spec.name, id)
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(DataResponse { data: doc }))
}

/// PUT /{collection}/{id}
///
/// Shallow-merges the body into the stored document.
async fn update_document(
    ctx: &ModuleContext,
    spec: &CollectionSpec,
    id: DbId,
    patch: Value,
) -> AppResult<impl IntoResponse> {
    require_object(&patch)?;
    let doc = DocumentRepo::update(&ctx.pool, &ctx.module_path, &spec.name, id, &patch)
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(DataResponse { data: doc }))
}

/// DELETE /{collection}/{id}
async fn delete_document(
    ctx: &ModuleContext,
    spec: &CollectionSpec,
    id: DbId,
) -> AppResult<impl IntoResponse> {
    if !DocumentRepo::delete(&ctx.pool, &ctx.module_path, &spec.name, id).await? {
        return Err(not_found(id));
    }
    Ok(Json(DataResponse {
        data: MessageResponse::new("Document deleted"),
    }))
}
