//! Domain logic for the modhost plugin platform.
//!
//! Everything here is free of database and HTTP concerns so it can be shared
//! by the API server and exercised directly in unit tests.

pub mod archive;
pub mod entry;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod placement;
pub mod route_definition;
pub mod runtime;
pub mod types;
