//! Module route definitions (`routes.json`).
//!
//! A module's backend declares its HTTP surface as data: individual routes
//! with a handler kind, plus named document collections that expand to a
//! standard CRUD route set. The server turns a validated definition into a
//! router and mounts it under the module's path.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::naming::is_contained_relative;

/// Route-definition file looked up in each server module directory.
pub const ROUTE_FILE: &str = "routes.json";

/// HTTP methods a module route may bind.
pub const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Path parameter name used by collection item routes.
pub const COLLECTION_ID_PARAM: &str = "id";

#[derive(Debug, thiserror::Error)]
pub enum RouteDefinitionError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid route definition JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid route definition: {0}")]
    Invalid(String),
}

/// Parsed contents of a `routes.json` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

/// One declared route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub method: String,
    pub path: String,
    pub handler: HandlerSpec,
}

/// How a declared route produces its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Fixed JSON response.
    Static {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default)]
        body: Value,
    },
    /// Script run per request; the request is piped to stdin as JSON and
    /// stdout becomes the response body.
    Script {
        script: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

fn default_status() -> u16 {
    200
}

/// A named JSON document collection exposed as CRUD routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Top-level fields a document must carry on create.
    #[serde(default)]
    pub required: Vec<String>,
}

/// A (method, path) pair a definition binds, after collection expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoundRoute {
    pub method: String,
    pub path: String,
}

impl CollectionSpec {
    pub fn base_path(&self) -> String {
        format!("/{}", self.name)
    }

    pub fn item_path(&self) -> String {
        format!("/{}/{{{COLLECTION_ID_PARAM}}}", self.name)
    }

    fn bound_routes(&self) -> Vec<BoundRoute> {
        let base = self.base_path();
        let item = self.item_path();
        [
            ("GET", &base),
            ("POST", &base),
            ("GET", &item),
            ("PUT", &item),
            ("DELETE", &item),
        ]
        .into_iter()
        .map(|(method, path)| BoundRoute {
            method: method.to_string(),
            path: path.clone(),
        })
        .collect()
    }
}

impl RouteDefinition {
    /// Every (method, path) this definition binds, sorted.
    pub fn bound_routes(&self) -> Vec<BoundRoute> {
        let mut bound: Vec<BoundRoute> = self
            .routes
            .iter()
            .map(|r| BoundRoute {
                method: r.method.clone(),
                path: r.path.clone(),
            })
            .chain(self.collections.iter().flat_map(CollectionSpec::bound_routes))
            .collect();
        bound.sort();
        bound
    }
}

/// Parse and validate definition text.
pub fn parse_route_definition(raw: &str) -> Result<RouteDefinition, RouteDefinitionError> {
    let definition: RouteDefinition = serde_json::from_str(raw)?;
    validate_route_definition(&definition)?;
    Ok(definition)
}

/// Read, parse and validate `<module_dir>/routes.json`.
///
/// Returns the definition together with a SHA-256 fingerprint of the raw
/// file so callers can tell whether anything changed since the last load.
pub async fn load_route_definition(
    module_dir: &Path,
) -> Result<(RouteDefinition, String), RouteDefinitionError> {
    let path = module_dir.join(ROUTE_FILE);
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|source| RouteDefinitionError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let fingerprint = format!("{:x}", Sha256::digest(&raw));
    let text = String::from_utf8_lossy(&raw);
    let definition = parse_route_definition(&text)?;
    Ok((definition, fingerprint))
}

/// Validate a definition so that building a router from it cannot fail.
pub fn validate_route_definition(definition: &RouteDefinition) -> Result<(), RouteDefinitionError> {
    for route in &definition.routes {
        if !SUPPORTED_METHODS.contains(&route.method.as_str()) {
            return Err(invalid(format!(
                "Unsupported method '{}' on {}. Supported: {}",
                route.method,
                route.path,
                SUPPORTED_METHODS.join(", "),
            )));
        }
        validate_path(&route.path)?;

        match &route.handler {
            HandlerSpec::Static { status, .. } => {
                if !(100..=599).contains(status) {
                    return Err(invalid(format!(
                        "Status {status} on {} {} is not a valid HTTP status",
                        route.method, route.path,
                    )));
                }
            }
            HandlerSpec::Script { script, .. } => validate_script_path(script)?,
        }
    }

    let mut names = HashSet::new();
    for collection in &definition.collections {
        let valid_name = !collection.name.is_empty()
            && collection
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'));
        if !valid_name {
            return Err(invalid(format!(
                "Collection name '{}' must match [a-z0-9_-]+",
                collection.name
            )));
        }
        if !names.insert(collection.name.as_str()) {
            return Err(invalid(format!(
                "Collection '{}' is declared twice",
                collection.name
            )));
        }
    }

    check_conflicts(&definition.bound_routes())
}

fn invalid(msg: String) -> RouteDefinitionError {
    RouteDefinitionError::Invalid(msg)
}

fn validate_path(path: &str) -> Result<(), RouteDefinitionError> {
    if path == "/" {
        return Ok(());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(invalid(format!("Route path '{path}' must start with '/'")));
    };
    for segment in rest.split('/') {
        let ok = match segment_param(segment) {
            Some(name) => {
                name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            }
        };
        if !ok {
            return Err(invalid(format!(
                "Route path '{path}' has an invalid segment '{segment}'"
            )));
        }
    }
    Ok(())
}

fn validate_script_path(script: &str) -> Result<(), RouteDefinitionError> {
    if is_contained_relative(script) {
        Ok(())
    } else {
        Err(invalid(format!(
            "Script '{script}' must be a relative path inside the module"
        )))
    }
}

fn segment_param(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

/// Reject duplicate bindings and parameter-name clashes the router would
/// refuse at runtime.
fn check_conflicts(bound: &[BoundRoute]) -> Result<(), RouteDefinitionError> {
    let mut seen = HashSet::new();
    for route in bound {
        if !seen.insert((&route.method, &route.path)) {
            return Err(invalid(format!(
                "{} {} is bound more than once",
                route.method, route.path
            )));
        }
    }

    // Two paths that share a segment shape up to a parameter position must
    // use the same parameter name there.
    let paths: HashSet<&str> = bound.iter().map(|r| r.path.as_str()).collect();
    let mut params_by_prefix: HashMap<String, &str> = HashMap::new();
    for path in paths {
        let mut prefix = String::new();
        for segment in path.trim_start_matches('/').split('/') {
            match segment_param(segment) {
                Some(name) => {
                    let existing = params_by_prefix.entry(prefix.clone()).or_insert(name);
                    if *existing != name {
                        return Err(invalid(format!(
                            "Parameters '{{{existing}}}' and '{{{name}}}' conflict at '{prefix}/'"
                        )));
                    }
                    prefix.push_str("/{}");
                }
                None => {
                    prefix.push('/');
                    prefix.push_str(segment);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TODO_DEFINITION: &str = r#"{
        "routes": [
            {"method": "GET", "path": "/ping", "handler": {"kind": "static", "body": {"message": "pong"}}},
            {"method": "POST", "path": "/todos/{id}/complete", "handler": {"kind": "script", "script": "scripts/complete.sh"}}
        ],
        "collections": [{"name": "todos", "required": ["title"]}]
    }"#;

    #[test]
    fn parses_routes_and_collections() {
        let def = parse_route_definition(TODO_DEFINITION).unwrap();
        assert_eq!(def.routes.len(), 2);
        assert_matches!(
            &def.routes[0].handler,
            HandlerSpec::Static { status: 200, .. }
        );
        assert_eq!(def.collections[0].required, vec!["title".to_string()]);
        assert_eq!(def.bound_routes().len(), 7);
    }

    #[test]
    fn empty_definition_is_valid() {
        let def = parse_route_definition("{}").unwrap();
        assert!(def.bound_routes().is_empty());
    }

    #[test]
    fn unsupported_method_rejected() {
        let raw = r#"{"routes":[{"method":"TRACE","path":"/x","handler":{"kind":"static"}}]}"#;
        assert_matches!(
            parse_route_definition(raw),
            Err(RouteDefinitionError::Invalid(_))
        );
    }

    #[test]
    fn bad_paths_rejected() {
        for path in ["x", "/a//b", "/:id", "/{*rest}", "/a/", "/{1x}"] {
            let raw = format!(
                r#"{{"routes":[{{"method":"GET","path":"{path}","handler":{{"kind":"static"}}}}]}}"#
            );
            assert!(parse_route_definition(&raw).is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn escaping_script_rejected() {
        let raw = r#"{"routes":[{"method":"GET","path":"/x","handler":{"kind":"script","script":"../../bin/sh"}}]}"#;
        assert_matches!(
            parse_route_definition(raw),
            Err(RouteDefinitionError::Invalid(_))
        );
        let raw = r#"{"routes":[{"method":"GET","path":"/x","handler":{"kind":"script","script":"/bin/sh"}}]}"#;
        assert!(parse_route_definition(raw).is_err());
    }

    #[test]
    fn duplicate_binding_rejected() {
        let raw = r#"{
            "routes": [{"method":"GET","path":"/todos","handler":{"kind":"static"}}],
            "collections": [{"name":"todos"}]
        }"#;
        assert_matches!(
            parse_route_definition(raw),
            Err(RouteDefinitionError::Invalid(msg)) if msg.contains("more than once")
        );
    }

    #[test]
    fn parameter_name_clash_rejected() {
        let raw = r#"{
            "routes": [{"method":"PATCH","path":"/todos/{todo_id}","handler":{"kind":"static"}}],
            "collections": [{"name":"todos"}]
        }"#;
        assert_matches!(
            parse_route_definition(raw),
            Err(RouteDefinitionError::Invalid(msg)) if msg.contains("conflict")
        );
    }

    #[test]
    fn bad_status_rejected() {
        let raw = r#"{"routes":[{"method":"GET","path":"/x","handler":{"kind":"static","status":42}}]}"#;
        assert!(parse_route_definition(raw).is_err());
    }

    #[test]
    fn duplicate_collection_rejected() {
        let raw = r#"{"collections":[{"name":"users"},{"name":"users"}]}"#;
        assert!(parse_route_definition(raw).is_err());
    }

    #[tokio::test]
    async fn fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ROUTE_FILE), "{}").unwrap();
        let (_, first) = load_route_definition(dir.path()).await.unwrap();
        let (_, again) = load_route_definition(dir.path()).await.unwrap();
        assert_eq!(first, again);

        std::fs::write(dir.path().join(ROUTE_FILE), r#"{"collections":[{"name":"a"}]}"#).unwrap();
        let (_, changed) = load_route_definition(dir.path()).await.unwrap();
        assert_ne!(first, changed);
    }

    #[tokio::test]
    async fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            load_route_definition(dir.path()).await,
            Err(RouteDefinitionError::Read { .. })
        );
    }
}
