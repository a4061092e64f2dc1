//! Environment templates
//!
//! Loads `repdev.yml`, merges env files, interpolates variables and
//! validates the result into an [`EnvironmentConfig`].

pub mod config;
pub mod env_file;
pub mod parser;

pub use config::{EnvironmentConfig, ServiceSpec, WaitStrategy, WaitTiming};
pub use parser::TemplateParser;
