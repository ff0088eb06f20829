//! Forwarding of module API requests to mounted routers.

use axum::extract::{OriginalUri, Request, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;

use super::MODULE_MOUNT_PREFIX;
use crate::error::AppError;
use crate::state::AppState;

/// Fallback handler: route `{MODULE_MOUNT_PREFIX}/{module_path}/...` to the
/// module's router, answering 404 for anything else.
pub async fn dispatch_module_request(
    State(state): State<AppState>,
    OriginalUri(original): OriginalUri,
    request: Request,
) -> Response {
    let Some((module_path, rest)) = split_module_path(original.path()) else {
        return AppError::NotFound(format!("No route for {}", original.path())).into_response();
    };

    let Some(router) = state.registry.router_for(module_path).await else {
        return AppError::NotFound(format!("Module '{module_path}' is not mounted"))
            .into_response();
    };

    let uri = match module_relative_uri(&rest, original.query()) {
        Ok(uri) => uri,
        Err(err) => return AppError::BadRequest(err.to_string()).into_response(),
    };

    // A fresh request so nothing the outer router recorded (matched path
    // parameters in particular) leaks into the module router.
    let (parts, body) = request.into_parts();
    let mut inner = Request::new(body);
    *inner.method_mut() = parts.method;
    *inner.uri_mut() = uri;
    *inner.version_mut() = parts.version;
    *inner.headers_mut() = parts.headers;

    match router.oneshot(inner).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Split a request path into `(module_path, module-relative path)`.
fn split_module_path(path: &str) -> Option<(&str, String)> {
    let tail = path.strip_prefix(MODULE_MOUNT_PREFIX)?.strip_prefix('/')?;
    let (module_path, rest) = match tail.split_once('/') {
        Some((module_path, rest)) => (module_path, format!("/{rest}")),
        None => (tail, "/".to_string()),
    };
    if module_path.is_empty() {
        return None;
    }
    Some((module_path, rest))
}

fn module_relative_uri(path: &str, query: Option<&str>) -> Result<Uri, axum::http::Error> {
    let path_and_query = match query {
        Some(q) => format!("{path}?{q}"),
        None => path.to_string(),
    };
    Uri::builder().path_and_query(path_and_query).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_module_and_rest() {
        assert_eq!(
            split_module_path("/api/v1/modules/17-ab-demo/ping"),
            Some(("17-ab-demo", "/ping".to_string()))
        );
        assert_eq!(
            split_module_path("/api/v1/modules/17-ab-demo/todos/4"),
            Some(("17-ab-demo", "/todos/4".to_string()))
        );
        assert_eq!(
            split_module_path("/api/v1/modules/17-ab-demo"),
            Some(("17-ab-demo", "/".to_string()))
        );
        assert_eq!(
            split_module_path("/api/v1/modules/17-ab-demo/"),
            Some(("17-ab-demo", "/".to_string()))
        );
    }

    #[test]
    fn rejects_paths_outside_the_prefix() {
        assert_eq!(split_module_path("/health"), None);
        assert_eq!(split_module_path("/api/v1/modules"), None);
        assert_eq!(split_module_path("/api/v1/modules/"), None);
        assert_eq!(split_module_path("/api/v1/modulesx/a"), None);
    }

    #[test]
    fn keeps_query_string() {
        let uri = module_relative_uri("/todos", Some("done=true")).unwrap();
        assert_eq!(uri.path(), "/todos");
        assert_eq!(uri.query(), Some("done=true"));
    }
}
