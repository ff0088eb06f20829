use std::path::PathBuf;
use std::time::Duration;

use modhost_core::archive::{ExtractLimits, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TOTAL_BYTES};
use modhost_core::entry::EntryRoots;
use modhost_core::placement::PlacementRoots;

use crate::mount::MODULE_MOUNT_PREFIX;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3001`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// SQLite connection string.
    pub database_url: String,
    /// Where raw uploads are written before extraction.
    pub upload_dir: PathBuf,
    /// Extracted archives, one directory per module path.
    pub staging_dir: PathBuf,
    /// Live server-side module tree scanned for route definitions.
    pub server_modules_dir: PathBuf,
    /// Live client-side module tree, served under `/client-modules`.
    pub client_modules_dir: PathBuf,
    /// Largest accepted request body, which bounds uploads.
    pub max_upload_bytes: usize,
    /// Cap on an archive's total uncompressed size.
    pub max_archive_bytes: u64,
    /// Cap on the number of entries in an archive.
    pub max_archive_entries: usize,
    /// Default timeout for module scripts.
    pub script_timeout_secs: u64,
    /// Delay of the follow-up re-mount after each install; `0` disables it.
    pub remount_delay_ms: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                       |
    /// |------------------------|-------------------------------|
    /// | `HOST`                 | `0.0.0.0`                     |
    /// | `PORT`                 | `3001`                        |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`       |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                          |
    /// | `DATABASE_URL`         | `sqlite://modhost.db?mode=rwc`|
    /// | `UPLOAD_DIR`           | `data/uploads`                |
    /// | `STAGING_DIR`          | `data/staging`                |
    /// | `SERVER_MODULES_DIR`   | `data/server-modules`         |
    /// | `CLIENT_MODULES_DIR`   | `data/client-modules`         |
    /// | `MAX_UPLOAD_BYTES`     | `67108864` (64 MiB)           |
    /// | `MAX_ARCHIVE_BYTES`    | `268435456` (256 MiB)         |
    /// | `MAX_ARCHIVE_ENTRIES`  | `10000`                       |
    /// | `SCRIPT_TIMEOUT_SECS`  | `30`                          |
    /// | `REMOUNT_DELAY_MS`     | `1000`                        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://modhost.db?mode=rwc".into());

        let dir = |key: &str, default: &str| {
            PathBuf::from(std::env::var(key).unwrap_or_else(|_| default.into()))
        };

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (64 * 1024 * 1024).to_string())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let max_archive_bytes: u64 = std::env::var("MAX_ARCHIVE_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_TOTAL_BYTES.to_string())
            .parse()
            .expect("MAX_ARCHIVE_BYTES must be a valid u64");

        let max_archive_entries: usize = std::env::var("MAX_ARCHIVE_ENTRIES")
            .unwrap_or_else(|_| DEFAULT_MAX_ENTRIES.to_string())
            .parse()
            .expect("MAX_ARCHIVE_ENTRIES must be a valid usize");

        let script_timeout_secs: u64 = std::env::var("SCRIPT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SCRIPT_TIMEOUT_SECS must be a valid u64");

        let remount_delay_ms: u64 = std::env::var("REMOUNT_DELAY_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("REMOUNT_DELAY_MS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            upload_dir: dir("UPLOAD_DIR", "data/uploads"),
            staging_dir: dir("STAGING_DIR", "data/staging"),
            server_modules_dir: dir("SERVER_MODULES_DIR", "data/server-modules"),
            client_modules_dir: dir("CLIENT_MODULES_DIR", "data/client-modules"),
            max_upload_bytes,
            max_archive_bytes,
            max_archive_entries,
            script_timeout_secs,
            remount_delay_ms,
        }
    }

    /// Create every module directory that does not exist yet.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.upload_dir,
            &self.staging_dir,
            &self.server_modules_dir,
            &self.client_modules_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_entries: self.max_archive_entries,
            max_total_bytes: self.max_archive_bytes,
        }
    }

    pub fn placement_roots(&self) -> PlacementRoots {
        PlacementRoots {
            server_modules: self.server_modules_dir.clone(),
            client_modules: self.client_modules_dir.clone(),
            mount_prefix: MODULE_MOUNT_PREFIX.to_string(),
        }
    }

    pub fn entry_roots(&self) -> EntryRoots {
        EntryRoots {
            server_modules: self.server_modules_dir.clone(),
            staging: self.staging_dir.clone(),
            client_modules: self.client_modules_dir.clone(),
        }
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    /// `None` when the follow-up re-mount is disabled.
    pub fn remount_delay(&self) -> Option<Duration> {
        (self.remount_delay_ms > 0).then(|| Duration::from_millis(self.remount_delay_ms))
    }
}
