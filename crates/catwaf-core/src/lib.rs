//! `CatWAF` Core Library
//!
//! Shared functionality for the `CatWAF` control plane:
//! - Configuration loading (TOML file plus environment overrides)
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::{Config, ReloadMode};
pub use error::{Error, Result};
