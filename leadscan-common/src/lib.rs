//! # Leadscan Common Library
//!
//! Shared code for the Leadscan services:
//! - Common error type
//! - Service configuration (TOML, environment, CLI layering)
//! - Logging bootstrap

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
