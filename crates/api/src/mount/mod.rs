//! Dynamic module mounting.
//!
//! Every directory under the server module root that carries a valid
//! `routes.json` gets its own [`axum::Router`], held in the
//! [`ModuleRegistry`]. Requests under [`MODULE_MOUNT_PREFIX`] that no
//! management route claims fall through to [`dispatch::dispatch_module_request`],
//! which forwards them to the owning module's router.

pub mod dispatch;
pub mod handlers;
pub mod registry;

pub use registry::{ModuleRegistry, MountError, MountInfo, MountReport, SkippedMount};

/// URL prefix modules are mounted under; a module answers at
/// `{MODULE_MOUNT_PREFIX}/{module_path}/...`.
pub const MODULE_MOUNT_PREFIX: &str = "/api/v1/modules";
