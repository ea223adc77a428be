//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! drives a capability gate, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout. The host reports platform state with
//! `platform.set` and answers every `remediation.requested` event with
//! `remediation.respond`.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.
//!
//! The configuration is read from `$SENSOR_GATE_CONFIG` when set, otherwise
//! from the default config path if that file exists.

use sensor_gate::config::GateConfig;
use sensor_gate::host::stdio::run_stdio_bridge;
use sensor_gate::sim::SimulatedPlatform;
use std::path::PathBuf;

fn load_config() -> anyhow::Result<GateConfig> {
    let path = match std::env::var_os("SENSOR_GATE_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => {
            let path = GateConfig::default_config_path();
            if !path.exists() {
                tracing::info!(path = %path.display(), "no config file; using defaults");
                return Ok(GateConfig::default());
            }
            path
        }
    };
    tracing::info!(path = %path.display(), "loading config");
    GateConfig::from_file(&path)
        .map_err(|e| anyhow::anyhow!("failed to load config from {}: {e}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("sensor-gate-host starting");

    let config = load_config()?;
    let platform = SimulatedPlatform::builder().build();

    run_stdio_bridge(platform, &config).await.map_err(|e| {
        tracing::error!(error = %e, "sensor-gate-host exited with error");
        anyhow::anyhow!("sensor-gate-host failed: {e}")
    })?;

    tracing::info!("sensor-gate-host shut down cleanly");
    Ok(())
}
