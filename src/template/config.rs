//! Template configuration types
//!
//! Everything in here is validated while it is deserialized: port and volume
//! strings are parsed into typed mappings and wait timings are range-checked,
//! so a malformed template fails at the loader instead of deep inside the
//! lifecycle driver.

use crate::error::{RepdevError, Result};
use crate::ownership::OwnershipLabel;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Smallest accepted polling interval for wait strategies
pub const MIN_INTERVAL_MS: u64 = 100;

/// Default readiness timeout when a template omits one
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Default polling interval when a template omits one
pub const DEFAULT_WAIT_INTERVAL_MS: u64 = 1_000;

/// A validated environment template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Template format version
    #[serde(default)]
    pub version: Option<String>,
    /// Environment name
    #[serde(default)]
    pub name: Option<String>,
    /// Global lifecycle hooks
    #[serde(default)]
    pub hooks: GlobalHooks,
    /// Services in declaration order, which is also execution order
    #[serde(default)]
    pub services: IndexMap<String, ServiceSpec>,
    /// Resolved path of the template this config was loaded from
    #[serde(skip)]
    pub template_path: Option<PathBuf>,
    /// Run identity derived from `template_path`
    #[serde(skip)]
    pub run_label: Option<OwnershipLabel>,
}

impl EnvironmentConfig {
    /// Directory relative paths in the template resolve against.
    pub fn project_root(&self) -> PathBuf {
        self.template_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Find the service whose declared container name is `container_name`.
    pub fn service_for_container(&self, container_name: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|(_, spec)| spec.container_name.as_deref() == Some(container_name))
            .map(|(name, _)| name.as_str())
    }
}

/// Template-wide hooks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalHooks {
    #[serde(default)]
    pub pre_up: Vec<String>,
    #[serde(default)]
    pub post_up: Vec<String>,
    #[serde(default)]
    pub pre_down: Vec<String>,
    #[serde(default)]
    pub post_down: Vec<String>,
}

/// Per-service hooks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHooks {
    #[serde(default)]
    pub before_start: Vec<String>,
    #[serde(default)]
    pub after_start: Vec<String>,
}

/// One declared service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Image reference
    pub image: String,
    /// Container name; the runtime picks one when absent
    #[serde(default)]
    pub container_name: Option<String>,
    /// Command override
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Port mappings
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Volume mappings
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    /// Environment variables
    #[serde(default)]
    pub environment: Environment,
    /// Environment files, loaded by the template parser
    #[serde(default)]
    pub env_file: Option<EnvFileConfig>,
    /// Informational only; declaration order governs execution
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Readiness gate
    #[serde(default)]
    pub wait_for: Option<WaitStrategy>,
    /// Per-service hooks
    #[serde(default)]
    pub hooks: ServiceHooks,
}

impl ServiceSpec {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            ..Default::default()
        }
    }
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

impl CommandConfig {
    /// Argument vector handed to the runtime
    pub fn to_args(&self) -> Vec<String> {
        match self {
            CommandConfig::Shell(s) => vec!["/bin/sh".to_string(), "-c".to_string(), s.clone()],
            CommandConfig::Exec(arr) => arr.clone(),
        }
    }
}

/// Env file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFileConfig {
    /// Single file
    Single(String),
    /// Multiple files
    Multiple(Vec<String>),
}

impl EnvFileConfig {
    pub fn files(&self) -> Vec<&str> {
        match self {
            EnvFileConfig::Single(f) => vec![f.as_str()],
            EnvFileConfig::Multiple(files) => files.iter().map(String::as_str).collect(),
        }
    }
}

/// Environment variables with unique keys, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EnvironmentVars")]
pub struct Environment(pub IndexMap<String, String>);

impl Environment {
    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `KEY=VALUE` strings for the runtime
    pub fn to_key_values(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

/// Environment as written in the template
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EnvironmentVars {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(IndexMap<String, Option<EnvValue>>),
}

/// Scalar environment value; YAML happily types `5432` or `true`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EnvValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::String(s) => write!(f, "{}", s),
            EnvValue::Integer(i) => write!(f, "{}", i),
            EnvValue::Float(x) => write!(f, "{}", x),
            EnvValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<EnvironmentVars> for Environment {
    fn from(vars: EnvironmentVars) -> Self {
        let map = match vars {
            EnvironmentVars::Array(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
            EnvironmentVars::Map(map) => map
                .into_iter()
                .map(|(key, value)| (key, value.map(|v| v.to_string()).unwrap_or_default()))
                .collect(),
        };
        Environment(map)
    }
}

/// Network protocol of a port mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// `[ip:]host:container[/protocol]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Runtime port key, e.g. `80/tcp`
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl FromStr for PortMapping {
    type Err = RepdevError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RepdevError::invalid_config(format!("invalid port mapping '{}'", s));

        let (ports, protocol) = match s.rsplit_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s, Protocol::Tcp),
        };

        let parts: Vec<&str> = ports.split(':').collect();
        let (host_ip, host, container) = match parts.as_slice() {
            [host, container] => (None, *host, *container),
            [ip, host, container] if !ip.is_empty() => (Some(ip.to_string()), *host, *container),
            _ => return Err(invalid()),
        };

        let host_port = host.trim().parse::<u16>().map_err(|_| invalid())?;
        let container_port = container.trim().parse::<u16>().map_err(|_| invalid())?;
        if container_port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            host_ip,
            host_port,
            container_port,
            protocol,
        })
    }
}

impl TryFrom<String> for PortMapping {
    type Error = RepdevError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(port: PortMapping) -> Self {
        port.to_string()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref ip) = self.host_ip {
            write!(f, "{}:", ip)?;
        }
        write!(f, "{}:{}", self.host_port, self.container_port)?;
        if self.protocol != Protocol::Tcp {
            write!(f, "/{}", self.protocol)?;
        }
        Ok(())
    }
}

/// `host:container[:ro|rw]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeMapping {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl VolumeMapping {
    /// Named volumes are passed through; anything path-like is a bind mount.
    pub fn is_named_volume(&self) -> bool {
        !(self.source.contains('/')
            || self.source.contains('\\')
            || self.source.starts_with('.')
            || self.source.starts_with('~'))
    }

    /// Bind string with the host side resolved to an absolute path.
    pub fn bind(&self, root: &Path) -> String {
        let source = if self.is_named_volume() {
            self.source.clone()
        } else {
            resolve_host_path(&self.source, root).display().to_string()
        };

        if self.read_only {
            format!("{}:{}:ro", source, self.target)
        } else {
            format!("{}:{}", source, self.target)
        }
    }
}

fn resolve_host_path(source: &str, root: &Path) -> PathBuf {
    if let Some(rest) = source.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }

    let path = Path::new(source);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let absolute = std::path::absolute(&joined).unwrap_or(joined);
    normalize(&absolute)
}

/// Lexically drop `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl FromStr for VolumeMapping {
    type Err = RepdevError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RepdevError::invalid_config(format!("invalid volume mapping '{}'", s));

        let parts: Vec<&str> = s.split(':').collect();
        let (source, target, read_only) = match parts.as_slice() {
            [source, target] => (*source, *target, false),
            [source, target, "ro"] => (*source, *target, true),
            [source, target, "rw"] => (*source, *target, false),
            _ => return Err(invalid()),
        };

        if source.is_empty() || !target.starts_with('/') {
            return Err(invalid());
        }

        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        })
    }
}

impl TryFrom<String> for VolumeMapping {
    type Error = RepdevError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VolumeMapping> for String {
    fn from(volume: VolumeMapping) -> Self {
        volume.to_string()
    }
}

impl fmt::Display for VolumeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)?;
        if self.read_only {
            write!(f, ":ro")?;
        }
        Ok(())
    }
}

/// Readiness gate for a started service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitStrategy {
    /// GET the URL until it answers with a status in [200, 400)
    Http {
        url: String,
        #[serde(flatten)]
        timing: WaitTiming,
    },
    /// Connect to host:port until the connection completes
    Tcp {
        #[serde(default = "default_tcp_host")]
        host: String,
        port: u16,
        #[serde(flatten)]
        timing: WaitTiming,
    },
    /// Inspect the container until the runtime reports it healthy
    #[serde(alias = "healthy")]
    ContainerHealthy {
        #[serde(default, alias = "container_name")]
        container: Option<String>,
        #[serde(flatten)]
        timing: WaitTiming,
    },
}

fn default_tcp_host() -> String {
    "localhost".to_string()
}

impl WaitStrategy {
    pub fn http(url: &str, timeout_ms: u64, interval_ms: u64) -> Result<Self> {
        Ok(WaitStrategy::Http {
            url: url.to_string(),
            timing: WaitTiming::new(timeout_ms, interval_ms)?,
        })
    }

    pub fn tcp(host: &str, port: u16, timeout_ms: u64, interval_ms: u64) -> Result<Self> {
        Ok(WaitStrategy::Tcp {
            host: host.to_string(),
            port,
            timing: WaitTiming::new(timeout_ms, interval_ms)?,
        })
    }

    pub fn container_healthy(container: Option<&str>, timeout_ms: u64, interval_ms: u64) -> Result<Self> {
        Ok(WaitStrategy::ContainerHealthy {
            container: container.map(str::to_string),
            timing: WaitTiming::new(timeout_ms, interval_ms)?,
        })
    }

    pub fn timing(&self) -> &WaitTiming {
        match self {
            WaitStrategy::Http { timing, .. }
            | WaitStrategy::Tcp { timing, .. }
            | WaitStrategy::ContainerHealthy { timing, .. } => timing,
        }
    }

    /// Short human description, e.g. `tcp localhost:5432`
    pub fn describe(&self) -> String {
        match self {
            WaitStrategy::Http { url, .. } => format!("http {}", url),
            WaitStrategy::Tcp { host, port, .. } => format!("tcp {}:{}", host, port),
            WaitStrategy::ContainerHealthy { container, .. } => match container {
                Some(c) => format!("container_healthy {}", c),
                None => "container_healthy".to_string(),
            },
        }
    }
}

/// Readiness timeout and polling interval, both in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWaitTiming")]
pub struct WaitTiming {
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(rename = "interval")]
    pub interval_ms: u64,
}

#[derive(Deserialize)]
struct RawWaitTiming {
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

fn default_interval() -> u64 {
    DEFAULT_WAIT_INTERVAL_MS
}

impl TryFrom<RawWaitTiming> for WaitTiming {
    type Error = RepdevError;

    fn try_from(raw: RawWaitTiming) -> Result<Self> {
        WaitTiming::new(raw.timeout, raw.interval)
    }
}

impl Default for WaitTiming {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            interval_ms: DEFAULT_WAIT_INTERVAL_MS,
        }
    }
}

impl WaitTiming {
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Result<Self> {
        if interval_ms < MIN_INTERVAL_MS {
            return Err(RepdevError::invalid_config(format!(
                "wait interval must be at least {}ms, got {}ms",
                MIN_INTERVAL_MS, interval_ms
            )));
        }
        Ok(Self {
            timeout_ms,
            interval_ms,
        })
    }

    /// `timeout / interval` rounded down, never less than one attempt
    pub fn retries(&self) -> u32 {
        let retries = self.timeout_ms / self.interval_ms.max(1);
        u32::try_from(retries).unwrap_or(u32::MAX).max(1)
    }
}
