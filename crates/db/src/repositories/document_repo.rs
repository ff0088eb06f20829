//! Repository for the `module_documents` table.
//!
//! Documents are always addressed through their owning module path and
//! collection name, so one module can never read another's rows.

use chrono::Utc;
use modhost_core::types::DbId;
use sqlx::SqlitePool;

use crate::models::document::{CreateModuleDocument, ModuleDocument};

/// Column list for `module_documents` queries.
const COLUMNS: &str = "id, module_path, collection, data, created_at, updated_at";

/// Provides CRUD operations for module collection documents.
pub struct DocumentRepo;

impl DocumentRepo {
    /// List a collection's documents in insertion order.
    pub async fn list(
        pool: &SqlitePool,
        module_path: &str,
        collection: &str,
    ) -> Result<Vec<ModuleDocument>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM module_documents \
             WHERE module_path = ? AND collection = ? \
             ORDER BY id"
        );
        sqlx::query_as::<_, ModuleDocument>(&query)
            .bind(module_path)
            .bind(collection)
            .fetch_all(pool)
            .await
    }

    pub async fn find(
        pool: &SqlitePool,
        module_path: &str,
        collection: &str,
        id: DbId,
    ) -> Result<Option<ModuleDocument>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM module_documents \
             WHERE module_path = ? AND collection = ? AND id = ?"
        );
        sqlx::query_as::<_, ModuleDocument>(&query)
            .bind(module_path)
            .bind(collection)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert a new document, returning the created row.
    pub async fn insert(
        pool: &SqlitePool,
        input: &CreateModuleDocument,
    ) -> Result<ModuleDocument, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO module_documents \
                (module_path, collection, data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ModuleDocument>(&query)
            .bind(&input.module_path)
            .bind(&input.collection)
            .bind(&input.data)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Merge `patch` into a document's data. Returns `None` if not found.
    ///
    /// Top-level keys of `patch` overwrite existing keys; a `null` value
    /// removes the key.
    pub async fn update(
        pool: &SqlitePool,
        module_path: &str,
        collection: &str,
        id: DbId,
        patch: &serde_json::Value,
    ) -> Result<Option<ModuleDocument>, sqlx::Error> {
        let query = format!(
            "UPDATE module_documents SET data = json_patch(data, ?), updated_at = ? \
             WHERE module_path = ? AND collection = ? AND id = ? \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ModuleDocument>(&query)
            .bind(patch)
            .bind(Utc::now())
            .bind(module_path)
            .bind(collection)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete one document. Returns `true` if a row was deleted.
    pub async fn delete(
        pool: &SqlitePool,
        module_path: &str,
        collection: &str,
        id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM module_documents WHERE module_path = ? AND collection = ? AND id = ?",
        )
        .bind(module_path)
        .bind(collection)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every document owned by a module. Returns the number removed.
    pub async fn delete_for_module(pool: &SqlitePool, module_path: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM module_documents WHERE module_path = ?")
            .bind(module_path)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
