//! Modhost API server library.
//!
//! Exposes config, state, error handling, routes, the module lifecycle and
//! the mount registry so integration tests and the binary entrypoint can
//! both access them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod mount;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
