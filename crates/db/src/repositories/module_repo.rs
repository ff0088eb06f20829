//! Repository for the `modules` table.

use chrono::Utc;
use modhost_core::types::DbId;
use sqlx::SqlitePool;

use crate::models::module::{CreateModule, Module};

/// Column list for `modules` queries.
const COLUMNS: &str = "\
    id, name, path, version, description, author, active, \
    created_at, updated_at";

/// Provides CRUD operations for installed modules.
pub struct ModuleRepo;

impl ModuleRepo {
    /// List all modules, newest first.
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Module>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM modules ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, Module>(&query).fetch_all(pool).await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<Module>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM modules WHERE id = ?");
        sqlx::query_as::<_, Module>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a module by its unique path.
    pub async fn find_by_path(pool: &SqlitePool, path: &str) -> Result<Option<Module>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM modules WHERE path = ?");
        sqlx::query_as::<_, Module>(&query)
            .bind(path)
            .fetch_optional(pool)
            .await
    }

    /// The most recently installed module that is still active.
    pub async fn find_latest_active(pool: &SqlitePool) -> Result<Option<Module>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM modules WHERE active = 1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, Module>(&query).fetch_optional(pool).await
    }

    /// Insert a new module, returning the created row.
    ///
    /// Fails with a unique violation when `path` is already taken.
    pub async fn insert(pool: &SqlitePool, input: &CreateModule) -> Result<Module, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO modules \
                (name, path, version, description, author, active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Module>(&query)
            .bind(&input.name)
            .bind(&input.path)
            .bind(&input.version)
            .bind(&input.description)
            .bind(&input.author)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Flip the `active` flag. Returns `None` if not found.
    pub async fn toggle_active(pool: &SqlitePool, id: DbId) -> Result<Option<Module>, sqlx::Error> {
        let query = format!(
            "UPDATE modules SET active = NOT active, updated_at = ? \
             WHERE id = ? \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Module>(&query)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete a module by ID. Returns `true` if a row was deleted.
    pub async fn delete(pool: &SqlitePool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM modules WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM modules")
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}
