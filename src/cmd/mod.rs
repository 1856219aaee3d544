//! CLI command implementations.

pub mod config;
pub mod serve;

pub use config::cmd_config;
pub use serve::cmd_serve;
