//! Fatal input errors. Warnings (unsupported volume shapes) are logged at
//! the call site and never reach this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("service {service}: ingress port label {value:?} is not an integer")]
    InvalidIngressPort { service: String, value: String },

    #[error("service {service}: port mapping {value:?} is not numeric")]
    InvalidPortMapping { service: String, value: String },

    #[error("service {service}: healthcheck duration {value:?} is not valid")]
    InvalidDuration { service: String, value: String },

    #[error("service {service}: healthcheck label {value:?} needs an explicit port for tcp:// probes")]
    InvalidHealthUrl { service: String, value: String },

    #[error("service {service}: healthcheck test must start with the CMD marker, got {value:?}")]
    InvalidHealthTest { service: String, value: String },

    #[error("service {service}: healthcheck command {value:?} is not parseable")]
    InvalidHealthCommand { service: String, value: String },

    #[error("environment file {file} of service {service}: line {line:?} is not KEY=value")]
    MalformedEnvLine {
        service: String,
        file: String,
        line: String,
    },

    #[error("reading environment file {file} of service {service}")]
    EnvFileRead {
        service: String,
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "service {dependent} waits for the port of {dependency}, but {dependency} never exposes \
         one; declare at least one port (ports section or hawser.io/ports label) on {dependency}"
    )]
    UnresolvedDependency {
        dependent: String,
        dependency: String,
    },
}
