//! hawser chart writer: serializes resource objects to two-space-indented
//! YAML, applies the template conditionals, and lays the chart out on disk
//! (templates/, values.yaml, Chart.yaml, NOTES.txt).

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use metrics::counter;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use hawser_core::resources::Resource;
use hawser_core::values::ValuesDocument;

pub mod conditional;

/// Strips the templated release prefix from a resource name, leaving the
/// store suffix used in filenames.
fn release_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{.*\}\}-?").expect("static pattern"))
}

/// Content-derived signature of the input manifest, stamped on every
/// resource as an annotation.
pub fn manifest_digest(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

pub struct ChartWriter {
    root: PathBuf,
    templates: PathBuf,
    app_name: String,
    /// Components with an ingress, collected for NOTES.txt.
    ingresses: Vec<String>,
}

impl ChartWriter {
    /// Create `<chart_dir>/<app_name>/templates/`, wiping any previous
    /// content of the chart directory.
    pub fn create(chart_dir: &Path, app_name: &str) -> Result<Self> {
        let root = chart_dir.join(app_name);
        if root.exists() {
            std::fs::remove_dir_all(&root)
                .with_context(|| format!("removing previous chart at {}", root.display()))?;
        }
        let templates = root.join("templates");
        std::fs::create_dir_all(&templates)
            .with_context(|| format!("creating {}", templates.display()))?;
        Ok(Self { root, templates, app_name: app_name.to_string(), ingresses: Vec::new() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serialize one resource, inject its conditionals, and persist it under
    /// templates/ with the per-kind naming scheme.
    pub fn write_resource(&mut self, service: &str, resource: &Resource) -> Result<PathBuf> {
        let doc = serde_yaml::to_string(resource)
            .with_context(|| format!("serializing {} for {service}", resource.kind()))?;

        let (filename, doc) = match resource {
            Resource::StorageClaim(pvc) => (
                format!("{service}-{}.pvc.yaml", pvc.volume_name()),
                conditional::gate_storage_claim(&doc, resource.component(), pvc.volume_name()),
            ),
            Resource::Workload(_) => (
                format!("{service}.deployment.yaml"),
                conditional::gate_workload_claims(&doc, resource.component()),
            ),
            Resource::Ingress(_) => {
                self.ingresses.push(resource.component().to_string());
                (
                    format!("{service}.ingress.yaml"),
                    conditional::gate_ingress(&doc, resource.component()),
                )
            }
            Resource::NetworkService(svc) => {
                let suffix = if svc.spec.service_type.as_deref() == Some("NodePort") {
                    "-external"
                } else {
                    ""
                };
                (format!("{service}{suffix}.service.yaml"), doc)
            }
            Resource::ConfigStore(_) | Resource::SecretStore(_) => {
                // several stores per service are possible; key the file by
                // the store suffix as well
                let store = release_prefix().replace_all(resource.name(), "");
                (format!("{service}.{store}.{}.yaml", resource.kind()), doc)
            }
        };

        let path = self.templates.join(filename);
        std::fs::write(&path, doc).with_context(|| format!("writing {}", path.display()))?;
        counter!("chart_files_written_total", 1u64);
        debug!(path = %path.display(), "wrote template");
        Ok(path)
    }

    pub fn write_values(&self, values: &ValuesDocument) -> Result<()> {
        let path = self.root.join("values.yaml");
        let doc = serde_yaml::to_string(values).context("serializing values document")?;
        std::fs::write(&path, doc).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "wrote values");
        Ok(())
    }

    pub fn write_chart_meta(&self, app_version: &str) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ChartMeta<'a> {
            api_version: &'a str,
            name: &'a str,
            description: String,
            r#type: &'a str,
            version: &'a str,
            app_version: &'a str,
        }
        let meta = ChartMeta {
            api_version: "v2",
            name: &self.app_name,
            description: format!("A helm chart for {}", self.app_name),
            r#type: "application",
            version: "0.1.0",
            app_version,
        };
        let path = self.root.join("Chart.yaml");
        let doc = serde_yaml::to_string(&meta).context("serializing chart metadata")?;
        std::fs::write(&path, doc).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Install notes: one line per ingress, shown only when its toggle is
    /// enabled at render time.
    pub fn write_notes(&self) -> Result<()> {
        let mut notes = String::from("Your release is named {{ .Release.Name }}.\n");
        let mut components = self.ingresses.clone();
        components.sort();
        components.dedup();
        for c in components {
            notes.push_str(&format!(
                "{{{{ if .Values.{c}.ingress.enabled }}}}{c}: http://{{{{ .Values.{c}.ingress.host }}}}{{{{ end }}}}\n"
            ));
        }
        let path = self.templates.join("NOTES.txt");
        std::fs::write(&path, notes).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
