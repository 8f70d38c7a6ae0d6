//! # Utilities
//!
//! - [`env`] - trimmed, validated and typed environment variable access used by
//!   [`PipelineConfig::from_env`](crate::config::PipelineConfig::from_env)

pub mod env;

pub use env::{EnvUtils, EnvVarError};
