//! Naming conventions for uploaded archives and installed module paths.
//!
//! A module's `path` doubles as its directory name under every module root
//! and as its HTTP mount segment, so it is restricted to a URL- and
//! filesystem-safe alphabet.

use std::path::{Component, Path};

/// MIME types accepted for module uploads.
pub const ZIP_CONTENT_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// Fallback slug when an upload name contains no usable characters.
const DEFAULT_SLUG: &str = "module";

/// Maximum slug length kept from the original file name.
const MAX_SLUG_LEN: usize = 48;

/// Whether an upload looks like a zip archive.
///
/// Only the declared MIME type and the file suffix are checked; the content
/// itself is validated later by the extractor.
pub fn is_zip_upload(file_name: &str, content_type: Option<&str>) -> bool {
    let by_type = content_type.is_some_and(|ct| ZIP_CONTENT_TYPES.contains(&ct));
    let by_suffix = file_name.to_ascii_lowercase().ends_with(".zip");
    by_type || by_suffix
}

/// File stem of the uploaded file, used as the default module name.
///
/// ```
/// use modhost_core::naming::display_stem;
///
/// assert_eq!(display_stem("demo.zip"), "demo");
/// assert_eq!(display_stem("dir/Todo Manager.zip"), "Todo Manager");
/// ```
pub fn display_stem(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| base.to_string())
}

/// Lowercase `[a-z0-9-]` slug of the upload's stem.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the module path for an upload.
///
/// Convention: `{millis}-{nonce}-{slug}`. The timestamp keeps paths roughly
/// ordered by upload time; the nonce keeps simultaneous uploads of the same
/// file apart.
///
/// ```
/// use modhost_core::naming::module_path_for;
///
/// assert_eq!(
///     module_path_for("Todo Module.zip", 1761375940805, "a1b2c3d4"),
///     "1761375940805-a1b2c3d4-todo-module",
/// );
/// ```
pub fn module_path_for(original_name: &str, millis: i64, nonce: &str) -> String {
    format!("{millis}-{nonce}-{}", slugify(&display_stem(original_name)))
}

/// Short random nonce for module paths.
pub fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Name under which the raw upload is stored: `{millis}-{nonce}-{basename}`.
///
/// The nonce keeps two uploads of the same file in the same millisecond
/// from overwriting each other.
pub fn stored_upload_name(original_name: &str, millis: i64, nonce: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{millis}-{nonce}-{safe}")
}

/// Whether `segment` is usable as a module path / mount segment.
pub fn is_valid_module_path(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Whether `relative` stays inside the directory it is joined onto.
pub fn is_contained_relative(relative: &str) -> bool {
    !relative.is_empty()
        && Path::new(relative)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
