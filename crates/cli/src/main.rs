use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::info;

use hawser_chart::ChartWriter;
use hawser_generate::{GenerationPipeline, StreamItem};

#[derive(Parser, Debug)]
#[command(name = "hawser", version, about = "Turn a compose manifest into a templated Helm chart")]
struct Cli {
    /// Compose file to convert
    #[arg(long = "compose", default_value = "docker-compose.yaml")]
    compose: PathBuf,

    /// Directory receiving the generated chart
    #[arg(long = "chart-dir", default_value = "chart")]
    chart_dir: PathBuf,

    /// Chart/application name
    #[arg(long = "app-name", default_value = "MyApp")]
    app_name: String,

    /// Chart appVersion field
    #[arg(long = "app-version", default_value = "0.0.1")]
    app_version: String,

    /// Overwrite an existing chart directory without asking
    #[arg(long = "force", action = ArgAction::SetTrue)]
    force: bool,
}

fn init_tracing() {
    let env = std::env::var("HAWSER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("HAWSER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid HAWSER_METRICS_ADDR; expected host:port");
        }
    }
}

/// Ask before wiping a chart directory that already exists.
fn confirm_overwrite(target: &Path) -> Result<bool> {
    print!(
        "The {} directory already exists and will be removed. Continue? [y/N]: ",
        target.display()
    );
    std::io::stdout().flush().context("flushing prompt")?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).context("reading answer")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let target = cli.chart_dir.join(&cli.app_name);
    if target.exists() && !cli.force && !confirm_overwrite(&target)? {
        println!("Cancelled");
        return Ok(());
    }

    let content = std::fs::read_to_string(&cli.compose)
        .with_context(|| format!("reading compose manifest {}", cli.compose.display()))?;
    let services = hawser_compose::parse(&content)?;
    let digest = hawser_chart::manifest_digest(&content);

    let pipeline = GenerationPipeline::new(&cli.app_name);
    let mut writer = ChartWriter::create(&cli.chart_dir, &cli.app_name)?;

    // Drain every stream; abort the whole run on the first fatal error so
    // partial output is never mistaken for a usable chart.
    for mut stream in pipeline.generate(&services) {
        while let Some(item) = stream.rx.recv().await {
            match item {
                StreamItem::Resource(mut resource) => {
                    resource.sign(&digest);
                    writer.write_resource(&stream.service, &resource)?;
                }
                StreamItem::End => break,
            }
        }
        stream.task.await.context("service generation task panicked")??;
    }

    writer.write_values(&pipeline.values().snapshot())?;
    writer.write_chart_meta(&cli.app_version)?;
    writer.write_notes()?;
    info!(chart = %writer.root().display(), "chart generated");
    Ok(())
}
