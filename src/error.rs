//! Error types for RepDev

use std::fmt;
use thiserror::Error;

/// Result type for RepDev operations
pub type Result<T> = std::result::Result<T, RepdevError>;

/// Step a per-service failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BeforeStart,
    PullImage,
    RemoveStale,
    Create,
    Start,
    Stop,
    Readiness,
    AfterStart,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::BeforeStart => write!(f, "beforeStart hooks"),
            Phase::PullImage => write!(f, "image pull"),
            Phase::RemoveStale => write!(f, "stale container removal"),
            Phase::Create => write!(f, "container create"),
            Phase::Start => write!(f, "container start"),
            Phase::Stop => write!(f, "container stop"),
            Phase::Readiness => write!(f, "readiness wait"),
            Phase::AfterStart => write!(f, "afterStart hooks"),
        }
    }
}

/// RepDev error types
#[derive(Error, Debug)]
pub enum RepdevError {
    #[error("Container runtime not reachable at {endpoint}: {reason}")]
    RuntimeUnreachable { endpoint: String, reason: String },

    #[error("Service '{service}' failed during {phase}: {source}")]
    ServiceFailed {
        service: String,
        phase: Phase,
        #[source]
        source: Box<RepdevError>,
    },

    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Service '{service}' not ready after {attempts} attempts ({elapsed_ms}ms)")]
    ReadinessTimeout {
        service: String,
        attempts: u32,
        elapsed_ms: u64,
    },

    #[error("Hook failed in {phase} ({command}): {reason}")]
    HookFailed {
        phase: String,
        command: String,
        reason: String,
    },

    #[error("Container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("Container error: {0}")]
    Container(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template file not found: {0}")]
    TemplateNotFound(String),

    #[error("Template parse error: {0}")]
    TemplateParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepdevError {
    /// Wraps an error with the service and phase it happened in.
    pub fn service_failed(service: impl Into<String>, phase: Phase, source: RepdevError) -> Self {
        Self::ServiceFailed {
            service: service.into(),
            phase,
            source: Box::new(source),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn container(reason: impl Into<String>) -> Self {
        Self::Container(reason.into())
    }

    /// Returns true if this is a runtime 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Runtime(bollard::errors::Error::DockerResponseServerError {
                status_code, ..
            }) => *status_code == 404,
            Self::ServiceNotFound(_) | Self::TemplateNotFound(_) => true,
            _ => false,
        }
    }

    /// Name of the known failure pattern this error matches, if any.
    pub fn diagnosis(&self) -> Option<&'static str> {
        self.known_issue().map(|(name, _)| name)
    }

    /// Remediation suggestions for the failure, most likely first.
    pub fn hints(&self) -> &'static [&'static str] {
        self.known_issue().map(|(_, hints)| hints).unwrap_or(GENERAL_HINTS)
    }

    fn known_issue(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self.root() {
            Self::RuntimeUnreachable { .. } => return Some(DAEMON_NOT_RUNNING),
            Self::TemplateNotFound(_) => return Some(TEMPLATE_NOT_FOUND),
            Self::ServiceNotFound(_) => return Some(UNKNOWN_SERVICE),
            Self::TemplateParse(_) | Self::InvalidConfig(_) => return Some(INVALID_TEMPLATE),
            Self::ReadinessTimeout { .. } => return Some(CONNECTION_TIMEOUT),
            _ => {}
        }

        let message = self.to_string().to_lowercase();
        KNOWN_ISSUES
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| message.contains(n)))
            .map(|(_, issue)| *issue)
    }

    fn root(&self) -> &RepdevError {
        match self {
            Self::ServiceFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

type Issue = (&'static str, &'static [&'static str]);

const DAEMON_NOT_RUNNING: Issue = (
    "Docker not running",
    &[
        "Start Docker Desktop or the docker service (sudo systemctl start docker)",
        "Check the daemon answers: docker ps",
        "Verify DOCKER_HOST / --host points at a reachable daemon",
    ],
);

const TEMPLATE_NOT_FOUND: Issue = (
    "Template not found",
    &[
        "Run from the project directory containing repdev.yml",
        "Pass the template explicitly: repdev up -t path/to/template.yml",
    ],
);

const UNKNOWN_SERVICE: Issue = (
    "Unknown service",
    &[
        "Use a service name declared under services: in repdev.yml",
        "Check the spelling passed to --service",
    ],
);

const INVALID_TEMPLATE: Issue = (
    "Invalid template",
    &[
        "Run \"repdev validate\" to see validation errors",
        "Check YAML syntax (indentation, colons, quotes)",
        "Ensure every service declares an image",
    ],
);

const CONNECTION_TIMEOUT: Issue = (
    "Connection timeout",
    &[
        "Increase timeout in the service's wait_for block",
        "Check the service is actually starting (docker logs <container>)",
        "Verify the probe URL or port matches the published port",
    ],
);

const KNOWN_ISSUES: &[(&[&str], Issue)] = &[
    (
        &["address already in use", "port is already allocated"],
        (
            "Port already in use",
            &[
                "Another process or container is using the port",
                "Stop the conflicting environment: repdev down",
                "Change the host port in repdev.yml",
            ],
        ),
    ),
    (
        &["is already in use by container"],
        (
            "Container name conflict",
            &[
                "Recreate with: repdev up --force",
                "Stop existing containers: repdev down",
                "Change container_name in repdev.yml",
            ],
        ),
    ),
    (
        &["pull access denied", "manifest unknown", "no such image", "repository does not exist"],
        (
            "Image not found",
            &[
                "Check the image name and tag in repdev.yml",
                "Try pulling manually: docker pull <image>",
                "Authenticate if the registry is private: docker login",
            ],
        ),
    ),
    (
        &["permission denied"],
        (
            "Permission denied",
            &[
                "On Linux add your user to the docker group: sudo usermod -aG docker $USER",
                "Ensure Docker can access mounted volume paths",
            ],
        ),
    ),
    (
        &["timed out", "timeout", "connection refused"],
        CONNECTION_TIMEOUT,
    ),
    (
        &["no space left", "disk"],
        (
            "Disk space",
            &[
                "Clean Docker resources: docker system prune",
                "Remove unused volumes: docker volume prune",
            ],
        ),
    ),
];

const GENERAL_HINTS: &[&str] = &[
    "Check Docker is running: docker ps",
    "Validate the template: repdev validate",
    "Re-run with --force to recreate containers",
    "Re-run with --debug for detailed logs",
];
