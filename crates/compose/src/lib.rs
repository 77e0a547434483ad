//! Compose manifest loading. Normalizes the dialect's many equivalent
//! shapes (map or list environment/labels, string or argv command, numeric
//! or string ports) into plain `ServiceDescriptor`s. File paths referenced
//! by services (env_file, volume sources) are kept verbatim; they are read
//! relative to the invocation directory, like the original tool.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;

use hawser_core::{labels, HealthCheck, ServiceDescriptor};

#[derive(Debug, Deserialize)]
struct RawCompose {
    #[serde(default)]
    services: BTreeMap<String, RawService>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    image: Option<String>,
    #[serde(default)]
    command: Option<StrOrList>,
    #[serde(default)]
    environment: Option<MapOrPairs>,
    #[serde(default)]
    env_file: Option<StrOrList>,
    #[serde(default)]
    ports: Vec<serde_yaml::Value>,
    #[serde(default)]
    expose: Vec<serde_yaml::Value>,
    #[serde(default)]
    volumes: Vec<String>,
    #[serde(default)]
    depends_on: Option<DependsOn>,
    #[serde(default)]
    labels: Option<MapOrPairs>,
    healthcheck: Option<RawHealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StrOrList {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MapOrPairs {
    Map(BTreeMap<String, serde_yaml::Value>),
    Pairs(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependsOn {
    Names(Vec<String>),
    Conditions(BTreeMap<String, serde_yaml::Value>),
}

#[derive(Debug, Deserialize)]
struct RawHealthCheck {
    #[serde(default)]
    test: Option<StrOrList>,
    interval: Option<String>,
    start_period: Option<String>,
    #[serde(default)]
    retries: u32,
}

/// Render a YAML scalar the way compose treats it: numbers and booleans
/// become their literal text, null becomes empty.
fn scalar(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

fn string_map(service: &str, field: &str, block: MapOrPairs) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match block {
        MapOrPairs::Map(map) => {
            for (k, v) in map {
                match scalar(&v) {
                    Some(s) => {
                        out.insert(k, s);
                    }
                    None => warn!(service, field, key = %k, "skipping non-scalar value"),
                }
            }
        }
        MapOrPairs::Pairs(pairs) => {
            for p in pairs {
                match p.split_once('=') {
                    Some((k, v)) => {
                        out.insert(k.trim().to_string(), v.trim().to_string());
                    }
                    None => warn!(service, field, entry = %p, "skipping entry without '='"),
                }
            }
        }
    }
    out
}

fn string_list(block: Option<StrOrList>) -> Vec<String> {
    match block {
        None => Vec::new(),
        Some(StrOrList::One(s)) => vec![s],
        Some(StrOrList::Many(v)) => v,
    }
}

fn build_service(name: &str, raw: RawService) -> Result<ServiceDescriptor> {
    let image = match raw.image {
        Some(i) => i,
        None => bail!("service {name} has no image"),
    };

    // String-form commands are split shell-style, matching the compose
    // dialect, not wrapped in `sh -c`.
    let command = match raw.command {
        None => Vec::new(),
        Some(StrOrList::Many(argv)) => argv,
        Some(StrOrList::One(line)) => shlex::split(&line)
            .with_context(|| format!("service {name}: unparsable command {line:?}"))?,
    };

    let environment = raw
        .environment
        .map(|e| string_map(name, "environment", e))
        .unwrap_or_default();

    let mut ports = Vec::new();
    for p in &raw.ports {
        match scalar(p) {
            Some(s) if !s.is_empty() => ports.push(s),
            _ => bail!("service {name}: unsupported ports entry {p:?}"),
        }
    }

    let mut expose = Vec::new();
    for e in &raw.expose {
        let s = scalar(e).unwrap_or_default();
        let port: u16 = s
            .parse()
            .with_context(|| format!("service {name}: expose entry {s:?} is not a port"))?;
        expose.push(port);
    }

    let depends_on = match raw.depends_on {
        None => Vec::new(),
        Some(DependsOn::Names(v)) => v,
        Some(DependsOn::Conditions(m)) => m.into_keys().collect(),
    };

    let labels = raw
        .labels
        .map(|l| string_map(name, "labels", l))
        .unwrap_or_default();

    let healthcheck = raw.healthcheck.map(|h| HealthCheck {
        test: string_list(h.test),
        interval: h.interval,
        start_period: h.start_period,
        retries: h.retries,
    });

    let mut svc = ServiceDescriptor {
        name: name.to_string(),
        image,
        command,
        environment,
        env_files: string_list(raw.env_file),
        ports,
        expose,
        volumes: raw.volumes,
        depends_on,
        labels,
        healthcheck,
    };

    // A ports label declares discovery ports for services whose compose
    // entry exposes none, e.g. databases only reached by other services.
    for extra in svc.label_list(labels::PORTS).into_iter().map(str::to_string).collect::<Vec<_>>() {
        if !svc.ports.iter().any(|p| p == &extra) {
            svc.ports.push(extra);
        }
    }

    Ok(svc)
}

/// Parse a compose document into descriptors, keyed (and sorted) by name.
pub fn parse(content: &str) -> Result<BTreeMap<String, ServiceDescriptor>> {
    let raw: RawCompose = serde_yaml::from_str(content).context("parsing compose manifest")?;
    let mut out = BTreeMap::new();
    for (name, svc) in raw.services {
        let parsed = build_service(&name, svc)?;
        out.insert(name, parsed);
    }
    Ok(out)
}

/// Load and parse a compose manifest from disk.
pub fn load(path: &Path) -> Result<BTreeMap<String, ServiceDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading compose manifest {}", path.display()))?;
    parse(&content)
}
