//! Ownership labels
//!
//! Every container created by `up` carries a label derived from the resolved
//! template path. `down` lists containers by that label to recover exactly
//! what a template run created, no matter how `container_name` was edited
//! afterwards.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::{Path, PathBuf};

/// Label key carrying the run identity
pub const OWNERSHIP_LABEL_KEY: &str = "repdev.template";

/// Label key carrying the declaring service's name
pub const SERVICE_LABEL_KEY: &str = "repdev.service";

/// Run identity attached to containers as `repdev.template=<value>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnershipLabel {
    value: String,
}

impl OwnershipLabel {
    /// Derive the label from a template path. The value is the URL-safe
    /// base64 of the path, so distinct paths always get distinct labels.
    pub fn derive(template_path: &Path) -> Self {
        let encoded = URL_SAFE_NO_PAD.encode(template_path.to_string_lossy().as_bytes());
        Self { value: encoded }
    }

    pub fn key(&self) -> &'static str {
        OWNERSHIP_LABEL_KEY
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// `key=value`, the form runtime label filters take
    pub fn selector(&self) -> String {
        format!("{}={}", OWNERSHIP_LABEL_KEY, self.value)
    }
}

/// Selector for the service label
pub fn service_selector(service: &str) -> String {
    format!("{}={}", SERVICE_LABEL_KEY, service)
}

/// Run label for a template path, derived from its resolved form so that
/// every spelling of the same file yields the same label.
pub fn derive_run_label(template_path: &Path) -> OwnershipLabel {
    OwnershipLabel::derive(&resolve_template_path(template_path))
}

/// Absolute, symlink-free form of a template path when it exists; otherwise
/// the path joined onto the working directory.
pub fn resolve_template_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
