//! Ambient stack shared by every `buildforge` crate: layered configuration,
//! tracing setup, and the outer error type used by binaries.

pub mod config;
pub mod error;
pub mod tracing_setup;

pub use config::AppConfig;
pub use error::{Result, ServerError};
