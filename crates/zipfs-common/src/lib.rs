//! zipfs Common - Shared types and utilities
//!
//! This crate provides the error type, configuration, and the value
//! types the file system layer hands to the index.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ArenaConfig, CacheConfig, Config, IndexConfig, LoggingConfig, ORDER};
pub use error::{Error, Result};
pub use types::*;
