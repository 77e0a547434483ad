//! hawser core types: service descriptors, label keys, resource model.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod resources;
pub mod values;

pub use error::Error;

/// Helm placeholder rendered to the release name at install time. Every
/// generated resource name starts with it so several releases of the same
/// chart can coexist in one namespace.
pub const RELEASE_NAME: &str = "{{ .Release.Name }}";

/// Domain prefixing every label and annotation hawser writes or reads.
pub const LABEL_DOMAIN: &str = "hawser.io";

/// Label keys recognized on input services.
pub mod labels {
    /// Port to route an Ingress to (integer value).
    pub const INGRESS: &str = "hawser.io/ingress";
    /// Extra declared ports, comma separated, for services whose compose
    /// entry has no `ports` section.
    pub const PORTS: &str = "hawser.io/ports";
    /// Routed healthcheck: `http://…`, `tcp://…`, or a shell command line.
    pub const HEALTHCHECK: &str = "hawser.io/healthcheck";
    /// Comma separated env_file entries to render as Secrets.
    pub const SECRET_ENVFILES: &str = "hawser.io/secret-envfiles";
    /// Comma separated volume sources to render as ConfigMaps.
    pub const CONFIGMAP_VOLUMES: &str = "hawser.io/configmap-volumes";
    /// Comma separated env var names whose value names another service;
    /// the value gets release-prefixed so it resolves in-cluster.
    pub const ENV_TO_SERVICE: &str = "hawser.io/env-to-service";
    /// Name of the service whose pod this service joins.
    pub const SAME_POD: &str = "hawser.io/same-pod";
}

pub mod prelude {
    pub use super::resources::Resource;
    pub use super::{Error, HealthCheck, ServiceDescriptor, LABEL_DOMAIN, RELEASE_NAME};
}

/// One deployable unit of the input manifest, already validated by the
/// compose loader. Port mappings stay raw (`host[:container]`) and volume
/// specs stay raw (`source:target`); the assembler interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub env_files: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub expose: Vec<u16>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
}

impl ServiceDescriptor {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|s| s.as_str())
    }

    /// Comma separated label value split into trimmed entries.
    pub fn label_list(&self, key: &str) -> Vec<&str> {
        self.label(key)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Compose healthcheck block, durations kept raw (`10s`, `1m30s`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    #[serde(default)]
    pub retries: u32,
}
