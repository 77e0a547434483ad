//! Shape of the values document. One entry per service; everything an
//! operator can override at install time lives here.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct IngressValues {
    pub class: String,
    pub host: String,
    pub enabled: bool,
}

impl IngressValues {
    /// Disabled by default; authors opt in per release.
    pub fn new(service: &str, app_name: &str) -> Self {
        Self {
            class: "nginx".to_string(),
            host: format!("{service}.{app_name}.tld"),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistenceValues {
    pub enabled: bool,
    pub capacity: String,
}

impl Default for PersistenceValues {
    fn default() -> Self {
        Self { enabled: false, capacity: "1Gi".to_string() }
    }
}

/// Per-service values. Secret literals land in `extra`, flattened to plain
/// keys so templates can reference `.Values.<service>.<KEY>`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressValues>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub persistence: BTreeMap<String, PersistenceValues>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// The whole values document, keyed by service name.
pub type ValuesDocument = BTreeMap<String, ServiceValues>;
