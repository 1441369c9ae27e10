//! # cocaine-core
//!
//! Common types of the cocaine client crates: endpoints and client config, the error types,
//! dispatch trees describing service protocols, and the header compression table.

mod config;
pub use config::*;
pub mod api;
pub mod error;
pub mod headers;
pub mod io;

pub use error::{CocaineError, ConnectError, ConnectReason, ServiceError};
