//! Observability support
//!
//! Structured logging setup built on the tracing crate.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
