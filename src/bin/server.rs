//! WebSocket server binary for tinyagent.
//!
//! Usage: `tinyagent-server [--config PATH]`

use std::path::PathBuf;

use anyhow::Context;
use tinyagent::{AgentServer, VoiceAgentConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn config_path_from_args() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().context("--config requires a path")?;
                path = Some(PathBuf::from(value));
            }
            other => match other.strip_prefix("--config=") {
                Some(value) => path = Some(PathBuf::from(value)),
                None => anyhow::bail!("unknown argument: {other}"),
            },
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = config_path_from_args()?;
    let config = VoiceAgentConfig::load(path.as_deref()).context("failed to load config")?;
    info!(
        asr = config.asr_configured(),
        llm = config.llm_configured(),
        tts = config.tts_configured(),
        "tinyagent v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = AgentServer::start(config).await?;
    info!("serving on {}; press Ctrl-C to stop", server.addr());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    server.shutdown();
    Ok(())
}
