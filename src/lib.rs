//! RepDev - template-driven local development environments
//!
//! RepDev reads a `repdev.yml` template describing a set of services and
//! brings them up or down against a Docker-compatible runtime. It provides:
//!
//! - Ordered per-service startup with image pulls and stale container cleanup
//! - Readiness gates (HTTP, TCP, container health)
//! - Lifecycle hooks around the environment and each service
//! - Ownership labels so teardown removes exactly what a template created
//! - Dry-run previews and service filters

pub mod client;
pub mod error;
pub mod events;
pub mod hooks;
pub mod lifecycle;
pub mod orchestrator;
pub mod ownership;
pub mod readiness;
pub mod settings;
pub mod state;
pub mod teardown;
pub mod template;

pub use error::{RepdevError, Result};
pub use orchestrator::{EnvironmentOrchestrator, OrchestrationOptions};
pub use teardown::TeardownResolver;
