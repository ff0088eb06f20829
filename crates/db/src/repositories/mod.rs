//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&SqlitePool` as the first argument.

pub mod document_repo;
pub mod module_repo;

pub use document_repo::DocumentRepo;
pub use module_repo::ModuleRepo;
