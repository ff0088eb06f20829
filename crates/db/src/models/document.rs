//! Module collection documents.

use modhost_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `module_documents` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModuleDocument {
    pub id: DbId,
    pub module_path: String,
    pub collection: String,
    pub data: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a document in a module collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateModuleDocument {
    pub module_path: String,
    pub collection: String,
    pub data: serde_json::Value,
}
