//! devtunnel Core Library
//!
//! Shared functionality for devtunnel components:
//! - Settings resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::Settings;
pub use error::{Error, Result};
