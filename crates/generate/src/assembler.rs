//! Per-service translation from a descriptor to resource objects. Pure
//! except for the two run-scoped shared tables (port registry, values
//! accumulator) and the env-file / config-directory reads.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use url::Url;

use hawser_core::resources::{
    release_name, ClaimRef, ConfigMap, Container, ContainerPort, Deployment, EnvFromSource,
    EnvVar, ExecProbe, HttpGet, Ingress, IngressBackend, IngressPath, IngressRule,
    BackendService, HttpRule, NameRef, PersistentVolumeClaim, PodVolume, PortNumber, Probe,
    Resource, Secret, Service, ServicePort, TcpSocket, VolumeMount,
};
use hawser_core::values::IngressValues;
use hawser_core::{labels, Error, ServiceDescriptor};

use crate::registry::PortRegistry;
use crate::values::ValuesAccumulator;
use crate::{PodRole, ServicePlan, StreamItem};

/// Polling loop run by init-wait containers until the dependency accepts a
/// TCP connection.
const WAIT_SCRIPT: &str = r#"OK=0
echo "Checking __service__ port"
while [ $OK != 1 ]; do
    echo -n "."
    nc -z {{ .Release.Name }}-__service__ __port__ 2>&1 >/dev/null && OK=1 || sleep 1
done
echo
echo "Done""#;

pub struct ManifestAssembler {
    app_name: String,
    registry: Arc<PortRegistry>,
    values: Arc<ValuesAccumulator>,
}

impl ManifestAssembler {
    pub fn new(app_name: &str, registry: Arc<PortRegistry>, values: Arc<ValuesAccumulator>) -> Self {
        Self { app_name: app_name.to_string(), registry, values }
    }

    /// Produce every resource for one service, in the fixed per-service
    /// order: stores and claims, then network resources, workload last.
    pub async fn assemble(
        &self,
        plan: &ServicePlan,
        tx: &UnboundedSender<StreamItem>,
    ) -> Result<(), Error> {
        let svc = plan.descriptor.as_ref();
        info!(service = %svc.name, "generating resources");

        let mut container = self.build_container(svc)?;

        for store in self.build_env_stores(svc)? {
            send(tx, store);
        }

        // Discovery happens before any dependency wait so chains of
        // dependent services cannot deadlock on each other.
        let declared = declared_ports(svc)?;
        match declared.first() {
            Some(&port) => self.registry.announce(&svc.name, port),
            None => self.registry.mark_unavailable(&svc.name),
        }

        // A grouped member has no workload: its volumes have nowhere to
        // mount, and its init-waits are built by the anchor alongside its
        // container.
        let (pod_volumes, mut init_containers) = match &plan.role {
            PodRole::Member { .. } => {
                if !svc.volumes.is_empty() {
                    warn!(
                        service = %svc.name,
                        "volumes on grouped services are not supported; skipping them"
                    );
                    counter!("generate_warnings_total", 1u64);
                }
                (Vec::new(), Vec::new())
            }
            _ => (
                self.prepare_volumes(svc, &mut container, tx),
                self.wait_containers(svc).await?,
            ),
        };

        let selector_component = match &plan.role {
            PodRole::Member { anchor } => anchor.as_str(),
            _ => svc.name.as_str(),
        };
        self.emit_network(svc, &declared, selector_component, tx)?;

        match &plan.role {
            PodRole::Member { anchor } => {
                debug!(service = %svc.name, anchor = %anchor, "grouped service; workload owned by anchor");
            }
            PodRole::Standalone | PodRole::Anchor(_) => {
                let mut containers = vec![container];
                if let PodRole::Anchor(members) = &plan.role {
                    for member in members {
                        containers.push(self.build_container(member)?);
                        init_containers.extend(self.wait_containers(member).await?);
                    }
                }
                let mut workload = Deployment::new(&svc.name);
                workload.spec.template.spec.containers = containers;
                workload.spec.template.spec.init_containers = init_containers;
                workload.spec.template.spec.volumes = pod_volumes;
                send(tx, Resource::Workload(workload));
            }
        }

        Ok(())
    }

    /// Main container: templated image reference, command, environment
    /// (service-valued vars release-prefixed), env-from wiring, probe,
    /// container ports.
    fn build_container(&self, svc: &ServiceDescriptor) -> Result<Container, Error> {
        let mut container = Container::new(&svc.name, &format!("{{{{ .Values.{}.image }}}}", svc.name));
        self.values.set_image(&svc.name, &svc.image);

        container.command = svc.command.clone();

        let to_services: Vec<&str> = svc.label_list(labels::ENV_TO_SERVICE);
        for (key, value) in &svc.environment {
            let value = if to_services.contains(&key.as_str()) {
                release_name(value)
            } else {
                value.clone()
            };
            container.env.push(EnvVar { name: key.clone(), value });
        }

        container.env_from = env_store_refs(svc);
        container.liveness_probe = self.build_probe(svc)?;
        container.ports = container_ports(svc)?;
        Ok(container)
    }

    /// One store per env_file: ConfigMap by default, Secret when the file
    /// is listed in the secret-envfiles label. Secret literals go to the
    /// values document; the store only carries the templated reference.
    fn build_env_stores(&self, svc: &ServiceDescriptor) -> Result<Vec<Resource>, Error> {
        let secret_files: Vec<&str> = svc.label_list(labels::SECRET_ENVFILES);
        let mut out = Vec::new();
        for file in &svc.env_files {
            let is_secret = secret_files.contains(&file.as_str());
            let entries = read_env_file(svc, file)?;
            let suffix = env_store_suffix(file, &svc.name);
            if is_secret {
                let mut secret = Secret::new(&svc.name, &suffix);
                for (key, value) in entries {
                    secret.data.insert(
                        key.clone(),
                        format!("{{{{ .Values.{}.{} | b64enc | quote }}}}", svc.name, key),
                    );
                    self.values.set_extra(&svc.name, &key, &value);
                }
                info!(service = %svc.name, store = %suffix, "generating secret");
                out.push(Resource::SecretStore(secret));
            } else {
                let mut cm = ConfigMap::new(&svc.name, &suffix);
                cm.data = entries;
                info!(service = %svc.name, store = %suffix, "generating configmap");
                out.push(Resource::ConfigStore(cm));
            }
        }
        Ok(out)
    }

    fn build_probe(&self, svc: &ServiceDescriptor) -> Result<Option<Probe>, Error> {
        let Some(hc) = &svc.healthcheck else { return Ok(None) };

        let interval = parse_duration(svc, hc.interval.as_deref(), "10s")?;
        let start_period = parse_duration(svc, hc.start_period.as_deref(), "0s")?;
        let mut probe = Probe::new(interval, start_period, hc.retries);

        let routed = svc.label(labels::HEALTHCHECK).filter(|v| !v.is_empty());
        if let Some(value) = routed {
            if value.starts_with("http://") {
                let (path, port) = match Url::parse(value) {
                    Ok(u) => {
                        let path = if u.path().is_empty() { "/".to_string() } else { u.path().to_string() };
                        (path, u.port().unwrap_or(80))
                    }
                    Err(_) => ("/".to_string(), 80),
                };
                probe.http_get = Some(HttpGet { path, port });
            } else if value.starts_with("tcp://") {
                let port = Url::parse(value)
                    .ok()
                    .and_then(|u| u.port())
                    .ok_or_else(|| Error::InvalidHealthUrl {
                        service: svc.name.clone(),
                        value: value.to_string(),
                    })?;
                probe.tcp_socket = Some(TcpSocket { port });
            } else {
                let command = shlex::split(value).ok_or_else(|| Error::InvalidHealthCommand {
                    service: svc.name.clone(),
                    value: value.to_string(),
                })?;
                probe.exec = Some(ExecProbe { command });
            }
        } else if let Some(first) = hc.test.first() {
            if first != "CMD" {
                return Err(Error::InvalidHealthTest {
                    service: svc.name.clone(),
                    value: first.clone(),
                });
            }
            probe.exec = Some(ExecProbe { command: hc.test[1..].to_vec() });
        } else {
            debug!(service = %svc.name, "healthcheck without test or label; skipping probe");
            return Ok(None);
        }

        Ok(Some(probe))
    }

    /// ConfigMap-from-directory volumes, persistent claims with their
    /// values toggles, and the warn-and-skip cases. Returns the pod volume
    /// list; mounts land on the container.
    fn prepare_volumes(
        &self,
        svc: &ServiceDescriptor,
        container: &mut Container,
        tx: &UnboundedSender<StreamItem>,
    ) -> Vec<PodVolume> {
        let cm_sources: Vec<String> =
            svc.label_list(labels::CONFIGMAP_VOLUMES).into_iter().map(str::to_string).collect();
        let mut pod_volumes = Vec::new();

        for raw in &svc.volumes {
            let Some((source, target)) = raw.split_once(':') else {
                warn!(service = %svc.name, volume = %raw, "anonymous volumes are not supported; skipping");
                counter!("generate_warnings_total", 1u64);
                continue;
            };

            let is_config = cm_sources.iter().any(|s| s == source);
            if !is_config && (source.starts_with('.') || source.starts_with('/')) {
                warn!(
                    service = %svc.name,
                    volume = %source,
                    "local filesystem mounts are not supported; skipping"
                );
                counter!("generate_warnings_total", 1u64);
                continue;
            }

            if is_config {
                let volname = source.replacen("./", "", 1).replace(['.', '/'], "-");
                let mut cm = ConfigMap::new(&svc.name, &format!("{}-{}", volname, svc.name));
                cm.data = config_data_from_dir(svc, source);
                pod_volumes.push(PodVolume {
                    name: volname.clone(),
                    config_map: Some(NameRef { name: cm.base.metadata.name.clone() }),
                    persistent_volume_claim: None,
                });
                container.volume_mounts.push(VolumeMount {
                    name: volname,
                    mount_path: target.to_string(),
                });
                send(tx, Resource::ConfigStore(cm));
            } else {
                let volname = source.replace('-', "");
                let pvc = PersistentVolumeClaim::new(&svc.name, &volname);
                pod_volumes.push(PodVolume {
                    name: volname.clone(),
                    config_map: None,
                    persistent_volume_claim: Some(ClaimRef {
                        claim_name: release_name(&format!("{}-{}", svc.name, volname)),
                    }),
                });
                container.volume_mounts.push(VolumeMount {
                    name: volname.clone(),
                    mount_path: target.to_string(),
                });
                info!(service = %svc.name, volume = %volname, "generating persistence values");
                self.values.set_persistence(&svc.name, &volname);
                send(tx, Resource::StorageClaim(pvc));
            }
        }
        pod_volumes
    }

    /// One init container per dependency, parameterized with the discovered
    /// port. Blocks on the registry until the dependency announces; a
    /// no-port dependency is a fatal input error.
    async fn wait_containers(&self, svc: &ServiceDescriptor) -> Result<Vec<Container>, Error> {
        let mut out = Vec::new();
        for dep in &svc.depends_on {
            let port = match self.registry.lookup(dep) {
                Some(port) => Some(port),
                None => {
                    debug!(service = %svc.name, dependency = %dep, "waiting for port discovery");
                    self.registry.subscribe(dep).await.unwrap_or(None)
                }
            };
            let Some(port) = port else {
                return Err(Error::UnresolvedDependency {
                    dependent: svc.name.clone(),
                    dependency: dep.clone(),
                });
            };
            let script = WAIT_SCRIPT
                .replace("__service__", dep)
                .replace("__port__", &port.to_string());
            let mut check = Container::new(&format!("check-{dep}"), "busybox");
            check.command = vec!["sh".to_string(), "-c".to_string(), script];
            out.push(check);
        }
        Ok(out)
    }

    /// NetworkService for any declared or exposed port, Ingress when the
    /// ingress label asks for one, and a NodePort service for exposed-only
    /// ports.
    fn emit_network(
        &self,
        svc: &ServiceDescriptor,
        declared: &[u16],
        selector_component: &str,
        tx: &UnboundedSender<StreamItem>,
    ) -> Result<(), Error> {
        if declared.is_empty() && svc.expose.is_empty() {
            return Ok(());
        }

        info!(service = %svc.name, "generating service");
        let mut ks = Service::new(&svc.name, selector_component);
        for &port in declared {
            ks.spec.ports.push(ServicePort { name: format!("port-{port}"), port, target_port: port });
        }
        send(tx, Resource::NetworkService(ks));

        if let Some(value) = svc.label(labels::INGRESS) {
            let port: u16 = value.parse().map_err(|_| Error::InvalidIngressPort {
                service: svc.name.clone(),
                value: value.to_string(),
            })?;
            info!(service = %svc.name, port, "generating ingress");
            send(tx, Resource::Ingress(self.build_ingress(svc, port)));
        }

        if !svc.expose.is_empty() {
            info!(service = %svc.name, "generating external service");
            let mut external = Service::new(&format!("{}-external", svc.name), selector_component);
            external.spec.service_type = Some("NodePort".to_string());
            for &port in &svc.expose {
                external.spec.ports.push(ServicePort {
                    name: format!("port-{port}"),
                    port,
                    target_port: port,
                });
            }
            send(tx, Resource::NetworkService(external));
        }

        Ok(())
    }

    fn build_ingress(&self, svc: &ServiceDescriptor, port: u16) -> Ingress {
        self.values
            .set_ingress(&svc.name, IngressValues::new(&svc.name, &self.app_name));
        let mut ingress = Ingress::new(&svc.name);
        ingress.spec.ingress_class_name =
            Some(format!("{{{{ .Values.{}.ingress.class }}}}", svc.name));
        ingress.spec.rules = vec![IngressRule {
            host: format!("{{{{ .Values.{}.ingress.host }}}}", svc.name),
            http: HttpRule {
                paths: vec![IngressPath {
                    path: "/".to_string(),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: BackendService {
                            name: release_name(&svc.name),
                            port: PortNumber { number: port },
                        },
                    },
                }],
            },
        }];
        ingress
    }
}

fn send(tx: &UnboundedSender<StreamItem>, resource: Resource) {
    counter!("generate_resources_total", 1u64);
    let _ = tx.send(StreamItem::Resource(resource));
}

/// Container-side targets of the declared port mappings, in declaration
/// order. `host:container` takes the container side; bare entries map a
/// port onto itself; a trailing protocol suffix is ignored.
fn declared_ports(svc: &ServiceDescriptor) -> Result<Vec<u16>, Error> {
    let mut out = Vec::new();
    for raw in &svc.ports {
        let spec = raw.split('/').next().unwrap_or(raw.as_str());
        let target = spec.rsplit(':').next().unwrap_or(spec);
        let port: u16 = target.trim().parse().map_err(|_| Error::InvalidPortMapping {
            service: svc.name.clone(),
            value: raw.clone(),
        })?;
        out.push(port);
    }
    Ok(out)
}

/// Declared ports then exposed-only ports, with colliding names suffixed by
/// the port number and exposed duplicates skipped.
fn container_ports(svc: &ServiceDescriptor) -> Result<Vec<ContainerPort>, Error> {
    let mut seen: BTreeSet<u16> = BTreeSet::new();
    let mut out: Vec<ContainerPort> = Vec::new();
    let mut push = |out: &mut Vec<ContainerPort>, seen: &mut BTreeSet<u16>, port: u16| {
        let name = if out.is_empty() {
            svc.name.clone()
        } else {
            format!("{}-{}", svc.name, port)
        };
        out.push(ContainerPort { name, container_port: port });
        seen.insert(port);
    };

    for &port in &declared_ports(svc)? {
        push(&mut out, &mut seen, port);
    }
    for &port in &svc.expose {
        if seen.contains(&port) {
            continue;
        }
        push(&mut out, &mut seen, port);
    }
    Ok(out)
}

/// Deterministic store suffix from an env file path: underscores and path
/// separators hyphenate, the `.env` extension and remaining dots drop out.
fn env_store_suffix(file: &str, service: &str) -> String {
    let f = file
        .replace('_', "-")
        .replace(".env", "")
        .replace('.', "")
        .replace('/', "-");
    let f = f.trim_matches('-');
    format!("{f}-{service}")
}

/// Env-from references for every env file, computed without touching the
/// filesystem so a pod anchor can wire a member's stores by name alone.
pub(crate) fn env_store_refs(svc: &ServiceDescriptor) -> Vec<EnvFromSource> {
    let secret_files: Vec<&str> = svc.label_list(labels::SECRET_ENVFILES);
    svc.env_files
        .iter()
        .map(|file| {
            let name = release_name(&env_store_suffix(file, &svc.name));
            if secret_files.contains(&file.as_str()) {
                EnvFromSource::secret(name)
            } else {
                EnvFromSource::config_map(name)
            }
        })
        .collect()
}

fn read_env_file(svc: &ServiceDescriptor, file: &str) -> Result<BTreeMap<String, String>, Error> {
    let content = std::fs::read_to_string(file).map_err(|source| Error::EnvFileRead {
        service: svc.name.clone(),
        file: file.to_string(),
        source,
    })?;
    let mut out = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::MalformedEnvLine {
                service: svc.name.clone(),
                file: file.to_string(),
                line: line.to_string(),
            });
        };
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// First-level files of a directory as store data. A missing or unreadable
/// directory renders an empty store; nested directories are skipped.
fn config_data_from_dir(svc: &ServiceDescriptor, source: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let entries = match std::fs::read_dir(Path::new(source)) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(service = %svc.name, source = %source, error = %err, "config volume source unreadable; rendering empty store");
            return out;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            warn!(service = %svc.name, path = %path.display(), "only first-level files render into a configmap; skipping directory");
            counter!("generate_warnings_total", 1u64);
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let name = entry.file_name().to_string_lossy().to_string();
                out.insert(name, content);
            }
            Err(err) => {
                warn!(service = %svc.name, path = %path.display(), error = %err, "skipping unreadable file");
                counter!("generate_warnings_total", 1u64);
            }
        }
    }
    out
}

fn parse_duration(
    svc: &ServiceDescriptor,
    value: Option<&str>,
    default: &str,
) -> Result<u64, Error> {
    let raw = match value {
        Some(v) if !v.is_empty() => v,
        _ => default,
    };
    humantime::parse_duration(raw)
        .map(|d| d.as_secs())
        .map_err(|_| Error::InvalidDuration {
            service: svc.name.clone(),
            value: raw.to_string(),
        })
}
