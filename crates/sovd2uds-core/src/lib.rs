//! sovd2uds-core - SOVD-facing types for the SOVD to UDS bridge
//!
//! This crate holds everything an outer layer (REST front-end, CLI, test
//! harness) needs to talk to a translation engine without knowing anything
//! about UDS: the symbolic request shape, the closed value type used for
//! parameters and results, the response envelope and the stable error
//! identifiers.

pub mod backend;
pub mod error;
pub mod models;

pub use backend::SovdExecutor;
pub use error::{ErrorDetail, ErrorKind};
pub use models::*;
