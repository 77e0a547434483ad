//! hawser generation pipeline: one concurrent task per service, a shared
//! port-discovery registry, and a values accumulator scoped to the run.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use hawser_core::resources::Resource;
use hawser_core::{labels, Error, ServiceDescriptor};

pub mod assembler;
pub mod registry;
pub mod values;

pub use assembler::ManifestAssembler;
pub use registry::{PortAnswer, PortRegistry};
pub use values::ValuesAccumulator;

/// Item of a per-service output stream. The explicit end marker lets a
/// consumer distinguish an orderly finish from a task that died early.
#[derive(Debug)]
pub enum StreamItem {
    Resource(Resource),
    End,
}

/// How a service participates in pod grouping.
#[derive(Debug, Clone)]
pub enum PodRole {
    Standalone,
    /// Owns the pod; grouped members contribute their containers here.
    Anchor(Vec<Arc<ServiceDescriptor>>),
    /// Joins another service's pod and emits no workload of its own.
    Member { anchor: String },
}

#[derive(Debug, Clone)]
pub struct ServicePlan {
    pub descriptor: Arc<ServiceDescriptor>,
    pub role: PodRole,
}

/// Output of one service generation task: the resource stream plus the
/// handle carrying the task's fatal result.
pub struct ServiceStream {
    pub service: String,
    pub rx: UnboundedReceiver<StreamItem>,
    pub task: JoinHandle<Result<(), Error>>,
}

/// Fan-out coordinator. Owns the registry and values accumulator for
/// exactly one run; tasks share them by reference.
pub struct GenerationPipeline {
    app_name: String,
    registry: Arc<PortRegistry>,
    values: Arc<ValuesAccumulator>,
}

impl GenerationPipeline {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            registry: Arc::new(PortRegistry::new()),
            values: Arc::new(ValuesAccumulator::new()),
        }
    }

    pub fn registry(&self) -> Arc<PortRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn values(&self) -> Arc<ValuesAccumulator> {
        Arc::clone(&self.values)
    }

    /// Launch one task per service and hand back their streams. Tasks run
    /// concurrently with no ordering guarantee; each stream keeps the fixed
    /// per-service order and terminates with [`StreamItem::End`]. A fatal
    /// error closes that stream without the marker and surfaces through the
    /// task handle — callers abort the whole run on the first failure.
    pub fn generate(&self, services: &BTreeMap<String, ServiceDescriptor>) -> Vec<ServiceStream> {
        let descriptors: BTreeMap<String, Arc<ServiceDescriptor>> = services
            .iter()
            .map(|(name, svc)| (name.clone(), Arc::new(svc.clone())))
            .collect();

        // A dependency on a service absent from the manifest can never be
        // announced; resolve those waits up front so nothing hangs.
        for svc in descriptors.values() {
            for dep in &svc.depends_on {
                if !descriptors.contains_key(dep) {
                    warn!(service = %svc.name, dependency = %dep, "dependency not in manifest");
                    self.registry.mark_unavailable(dep);
                }
            }
        }

        let (mut members_of, member_anchor) = plan_pods(&descriptors);

        let mut streams = Vec::with_capacity(descriptors.len());
        for (name, descriptor) in &descriptors {
            let role = if let Some(anchor) = member_anchor.get(name) {
                PodRole::Member { anchor: anchor.clone() }
            } else if let Some(members) = members_of.remove(name) {
                PodRole::Anchor(members)
            } else {
                PodRole::Standalone
            };
            let plan = ServicePlan { descriptor: Arc::clone(descriptor), role };
            let assembler =
                ManifestAssembler::new(&self.app_name, self.registry(), self.values());
            let (tx, rx) = mpsc::unbounded_channel();
            let service = name.clone();
            let task = tokio::spawn(async move {
                match assembler.assemble(&plan, &tx).await {
                    Ok(()) => {
                        let _ = tx.send(StreamItem::End);
                        Ok(())
                    }
                    Err(err) => {
                        error!(service = %plan.descriptor.name, error = %err, "generation failed");
                        counter!("generate_failures_total", 1u64);
                        Err(err)
                    }
                }
            });
            streams.push(ServiceStream { service, rx, task });
        }
        streams
    }
}

/// Resolve same-pod labels into anchor/member assignments. A member whose
/// anchor is missing, grouped itself, or is the member itself stays
/// standalone (with a warning).
#[allow(clippy::type_complexity)]
fn plan_pods(
    descriptors: &BTreeMap<String, Arc<ServiceDescriptor>>,
) -> (
    BTreeMap<String, Vec<Arc<ServiceDescriptor>>>,
    BTreeMap<String, String>,
) {
    let mut members_of: BTreeMap<String, Vec<Arc<ServiceDescriptor>>> = BTreeMap::new();
    let mut member_anchor: BTreeMap<String, String> = BTreeMap::new();

    for (name, svc) in descriptors {
        let Some(anchor) = svc.label(labels::SAME_POD) else { continue };
        let valid = anchor != name
            && descriptors
                .get(anchor)
                .is_some_and(|a| a.label(labels::SAME_POD).is_none());
        if !valid {
            warn!(
                service = %name,
                anchor = %anchor,
                "same-pod target missing or itself grouped; keeping the service standalone"
            );
            continue;
        }
        members_of.entry(anchor.to_string()).or_default().push(Arc::clone(svc));
        member_anchor.insert(name.clone(), anchor.to_string());
    }
    (members_of, member_anchor)
}
