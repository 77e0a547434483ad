//! In-memory model of the generated Kubernetes manifests. Field names follow
//! the wire format (camelCase); every map is a BTreeMap so serialization is
//! byte-stable across runs. Values that Helm substitutes at render time are
//! stored as `{{ … }}` strings in otherwise ordinary fields.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{LABEL_DOMAIN, RELEASE_NAME};

/// Selector labels stamped on every resource and used for service selectors.
pub fn component_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (format!("{LABEL_DOMAIN}/component"), component.to_string()),
        (format!("{LABEL_DOMAIN}/release"), RELEASE_NAME.to_string()),
    ])
}

/// Release-prefixed resource name.
pub fn release_name(suffix: &str) -> String {
    format!("{RELEASE_NAME}-{suffix}")
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Base {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
}

impl Base {
    fn new(api_version: &str, kind: &str, component: &str, name_suffix: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: Metadata {
                name: release_name(name_suffix),
                labels: component_labels(component),
                annotations: BTreeMap::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<NameRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NameRef>,
}

impl EnvFromSource {
    pub fn config_map(name: String) -> Self {
        Self { config_map_ref: Some(NameRef { name }), ..Default::default() }
    }
    pub fn secret(name: String) -> Self {
        Self { secret_ref: Some(NameRef { name }), ..Default::default() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpGet {
    pub path: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpSocket {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecProbe {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub period_seconds: u64,
    pub initial_delay_seconds: u64,
    pub success_threshold: u32,
    pub failure_threshold: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpSocket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecProbe>,
}

impl Probe {
    pub fn new(period_seconds: u64, initial_delay_seconds: u64, failure_threshold: u32) -> Self {
        Self {
            period_seconds,
            initial_delay_seconds,
            success_threshold: 1,
            failure_threshold,
            http_get: None,
            tcp_socket: None,
            exec: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
}

impl Container {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            command: Vec::new(),
            ports: Vec::new(),
            env: Vec::new(),
            env_from: Vec::new(),
            volume_mounts: Vec::new(),
            liveness_probe: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimRef {
    #[serde(rename = "claimName")]
    pub claim_name: String,
}

/// One entry of the pod volumes list: either a configMap source or a
/// persistent claim reference (the conditionalizer rewrites the latter).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodVolume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<NameRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateMetadata {
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<PodVolume>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodTemplate {
    pub metadata: TemplateMetadata,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub selector: Selector,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    #[serde(flatten)]
    pub base: Base,
    pub spec: DeploymentSpec,
}

impl Deployment {
    pub fn new(component: &str) -> Self {
        let labels = component_labels(component);
        Self {
            base: Base::new("apps/v1", "Deployment", component, component),
            spec: DeploymentSpec {
                replicas: 1,
                selector: Selector { match_labels: labels.clone() },
                template: PodTemplate {
                    metadata: TemplateMetadata { labels },
                    spec: PodSpec {
                        init_containers: Vec::new(),
                        containers: Vec::new(),
                        volumes: Vec::new(),
                    },
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSpec {
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    #[serde(flatten)]
    pub base: Base,
    pub spec: ServiceSpec,
}

impl Service {
    /// `name` is the resource suffix (`web`, `web-external`); `selector_component`
    /// is the component the service routes to, which differs for external
    /// services and same-pod members.
    pub fn new(name: &str, selector_component: &str) -> Self {
        Self {
            base: Base::new("v1", "Service", name, name),
            spec: ServiceSpec {
                selector: component_labels(selector_component),
                ports: Vec::new(),
                service_type: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortNumber {
    pub number: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendService {
    pub name: String,
    pub port: PortNumber,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngressBackend {
    pub service: BackendService,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPath {
    pub path: String,
    pub path_type: String,
    pub backend: IngressBackend,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpRule {
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngressRule {
    pub host: String,
    pub http: HttpRule,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    pub rules: Vec<IngressRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ingress {
    #[serde(flatten)]
    pub base: Base,
    pub spec: IngressSpec,
}

impl Ingress {
    pub fn new(component: &str) -> Self {
        Self {
            base: Base::new("networking.k8s.io/v1", "Ingress", component, component),
            spec: IngressSpec { ingress_class_name: None, rules: Vec::new() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigMap {
    #[serde(flatten)]
    pub base: Base,
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(component: &str, name_suffix: &str) -> Self {
        Self {
            base: Base::new("v1", "ConfigMap", component, name_suffix),
            data: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Secret {
    #[serde(flatten)]
    pub base: Base,
    pub data: BTreeMap<String, String>,
}

impl Secret {
    pub fn new(component: &str, name_suffix: &str) -> Self {
        Self {
            base: Base::new("v1", "Secret", component, name_suffix),
            data: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageRequest {
    pub storage: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PvcResources {
    pub requests: StorageRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    pub access_modes: Vec<String>,
    pub resources: PvcResources,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistentVolumeClaim {
    #[serde(flatten)]
    pub base: Base,
    pub spec: PvcSpec,
}

impl PersistentVolumeClaim {
    /// Capacity is deferred to the values document, gated per service and
    /// per volume. The claim name carries both so two services can own a
    /// volume of the same name.
    pub fn new(component: &str, volume: &str) -> Self {
        let suffix = format!("{component}-{volume}");
        let mut base = Base::new("v1", "PersistentVolumeClaim", component, &suffix);
        base.metadata
            .labels
            .insert(format!("{LABEL_DOMAIN}/pvc-name"), volume.to_string());
        Self {
            base,
            spec: PvcSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                resources: PvcResources {
                    requests: StorageRequest {
                        storage: format!(
                            "{{{{ .Values.{component}.persistence.{volume}.capacity }}}}"
                        ),
                    },
                },
            },
        }
    }

    pub fn volume_name(&self) -> &str {
        self.base
            .metadata
            .labels
            .get(&format!("{LABEL_DOMAIN}/pvc-name"))
            .map(|s| s.as_str())
            .unwrap_or_default()
    }
}

/// Everything one service generation task can emit.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Resource {
    Workload(Deployment),
    NetworkService(Service),
    Ingress(Ingress),
    ConfigStore(ConfigMap),
    SecretStore(Secret),
    StorageClaim(PersistentVolumeClaim),
}

impl Resource {
    fn base(&self) -> &Base {
        match self {
            Resource::Workload(r) => &r.base,
            Resource::NetworkService(r) => &r.base,
            Resource::Ingress(r) => &r.base,
            Resource::ConfigStore(r) => &r.base,
            Resource::SecretStore(r) => &r.base,
            Resource::StorageClaim(r) => &r.base,
        }
    }

    fn base_mut(&mut self) -> &mut Base {
        match self {
            Resource::Workload(r) => &mut r.base,
            Resource::NetworkService(r) => &mut r.base,
            Resource::Ingress(r) => &mut r.base,
            Resource::ConfigStore(r) => &mut r.base,
            Resource::SecretStore(r) => &mut r.base,
            Resource::StorageClaim(r) => &mut r.base,
        }
    }

    /// Lowercase kind used as the template file suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Workload(_) => "deployment",
            Resource::NetworkService(_) => "service",
            Resource::Ingress(_) => "ingress",
            Resource::ConfigStore(_) => "configmap",
            Resource::SecretStore(_) => "secret",
            Resource::StorageClaim(_) => "pvc",
        }
    }

    pub fn name(&self) -> &str {
        &self.base().metadata.name
    }

    pub fn component(&self) -> &str {
        self.base()
            .metadata
            .labels
            .get(&format!("{LABEL_DOMAIN}/component"))
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Stamp the content-derived signature of the input manifest. The only
    /// field allowed to differ between regenerations from edited input.
    pub fn sign(&mut self, digest: &str) {
        self.base_mut()
            .metadata
            .annotations
            .insert(format!("{LABEL_DOMAIN}/compose-hash"), digest.to_string());
    }
}
