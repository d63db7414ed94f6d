//! # sage-config
//!
//! TOML configuration for the Sage server: schema with per-section defaults,
//! environment variable overrides and startup validation.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::SageConfig;
