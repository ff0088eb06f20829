//! Module manifest (`module.json`) parsing.
//!
//! Manifests are loosely typed: uploads in the wild carry numeric versions,
//! stray surrounding quotes from shell-generated files, and missing fields.
//! Parsing is tolerant of all of these; resolution never fails outright and
//! falls back to filename-derived defaults instead.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

/// File name of the optional manifest at the root of an extracted archive.
pub const MANIFEST_FILE: &str = "module.json";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Manifest must be a JSON object")]
    NotAnObject,
}

/// Metadata declared by a module. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
}

/// Manifest after applying defaults, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedManifest {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
}

impl ResolvedManifest {
    /// Defaults used when no manifest is present or it cannot be parsed.
    pub fn fallback(default_name: &str) -> Self {
        Self {
            name: default_name.to_string(),
            version: None,
            description: None,
            author: None,
        }
    }

    fn from_manifest(manifest: ModuleManifest, default_name: &str) -> Self {
        Self {
            name: manifest.name.unwrap_or_else(|| default_name.to_string()),
            version: manifest.version,
            description: manifest.description,
            author: manifest.author,
        }
    }
}

/// Parse manifest text.
///
/// One layer of leading/trailing quote characters is stripped before the
/// first attempt; if that fails the raw (trimmed) text is tried. When both
/// fail the error from the first attempt is returned.
pub fn parse_manifest(raw: &str) -> Result<ModuleManifest, ManifestError> {
    let trimmed = raw.trim();
    let stripped = strip_one_quote_layer(trimmed);

    match parse_object(stripped) {
        Ok(manifest) => Ok(manifest),
        Err(first) if stripped != trimmed => parse_object(trimmed).map_err(|_| first),
        Err(first) => Err(first),
    }
}

/// Read and resolve the manifest in `staging_dir`.
///
/// Returns the resolved manifest and, when the file existed but was
/// unusable, the error that forced the fallback.
pub async fn resolve_manifest(
    staging_dir: &Path,
    default_name: &str,
) -> (ResolvedManifest, Option<ManifestError>) {
    let path = staging_dir.join(MANIFEST_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return (ResolvedManifest::fallback(default_name), None);
    }

    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(source) => {
            let err = ManifestError::Read {
                path: path.display().to_string(),
                source,
            };
            return (ResolvedManifest::fallback(default_name), Some(err));
        }
    };

    match parse_manifest(&raw) {
        Ok(manifest) => (ResolvedManifest::from_manifest(manifest, default_name), None),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Unusable module manifest");
            (ResolvedManifest::fallback(default_name), Some(err))
        }
    }
}

fn strip_one_quote_layer(text: &str) -> &str {
    let text = text
        .strip_prefix(['"', '\''])
        .unwrap_or(text);
    text.strip_suffix(['"', '\'']).unwrap_or(text)
}

fn parse_object(text: &str) -> Result<ModuleManifest, ManifestError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = value else {
        return Err(ManifestError::NotAnObject);
    };

    Ok(ModuleManifest {
        name: loose_string(map.get("name")),
        version: loose_string(map.get("version")),
        description: loose_string(map.get("description")),
        author: loose_string(map.get("author")),
    })
}

/// Strings pass through and numbers and `true` are stringified. Falsy values
/// (blank strings, zero, `false`) and anything else count as absent.
fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn plain_manifest_parses() {
        let m = parse_manifest(r#"{"name":"Demo","version":"1.0"}"#).unwrap();
        assert_eq!(m.name.as_deref(), Some("Demo"));
        assert_eq!(m.version.as_deref(), Some("1.0"));
        assert_eq!(m.author, None);
    }

    #[test]
    fn surrounding_quotes_are_stripped() {
        let m = parse_manifest("'{\"name\":\"Quoted\"}'\n").unwrap();
        assert_eq!(m.name.as_deref(), Some("Quoted"));
    }

    #[test]
    fn only_one_quote_layer_is_stripped() {
        assert!(parse_manifest(r#"""{"name":"x"}"""#).is_err());
    }

    #[test]
    fn numeric_version_is_stringified() {
        let m = parse_manifest(r#"{"name":"n","version":2}"#).unwrap();
        assert_eq!(m.version.as_deref(), Some("2"));
    }

    #[test]
    fn unbalanced_braces_fail() {
        assert_matches!(
            parse_manifest(r#"{"name":"Broken""#),
            Err(ManifestError::Parse(_))
        );
    }

    #[test]
    fn non_object_rejected() {
        assert_matches!(parse_manifest("[1,2]"), Err(ManifestError::NotAnObject));
    }

    #[test]
    fn falsy_fields_are_absent() {
        let m = parse_manifest(
            r#"{"name":"X","version":"","author":"  ","description":false}"#,
        )
        .unwrap();
        assert_eq!(m.name.as_deref(), Some("X"));
        assert_eq!(m.version, None);
        assert_eq!(m.author, None);
        assert_eq!(m.description, None);

        let m = parse_manifest(r#"{"name":"X","version":0,"author":true}"#).unwrap();
        assert_eq!(m.version, None);
        assert_eq!(m.author.as_deref(), Some("true"));
    }

    #[test]
    fn blank_name_treated_as_missing() {
        let m = parse_manifest(r#"{"name":"  "}"#).unwrap();
        assert_eq!(m.name, None);
    }

    #[tokio::test]
    async fn missing_manifest_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (resolved, err) = resolve_manifest(dir.path(), "demo").await;
        assert_eq!(resolved, ResolvedManifest::fallback("demo"));
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn corrupt_manifest_uses_fallback_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{\"name\": \"x\"").unwrap();
        let (resolved, err) = resolve_manifest(dir.path(), "notes").await;
        assert_eq!(resolved.name, "notes");
        assert_eq!(resolved.version, None);
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn manifest_fields_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"version":"0.3","author":"ops","description":"d"}"#,
        )
        .unwrap();
        let (resolved, err) = resolve_manifest(dir.path(), "stem").await;
        assert!(err.is_none());
        assert_eq!(resolved.name, "stem");
        assert_eq!(resolved.version.as_deref(), Some("0.3"));
        assert_eq!(resolved.author.as_deref(), Some("ops"));
        assert_eq!(resolved.description.as_deref(), Some("d"));
    }
}
