//! Cordgate bot binary.
//!
//! Connects to the gateway, logs every message event and exits when the
//! session dies or on Ctrl-C.

use std::path::PathBuf;

use clap::Parser;
use cordgate::session::LifecycleEvent;
use cordgate::{Bot, Config};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "cordgate", version, about = "Gateway adapter for chat bots")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "cordgate.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cordgate=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).await?.resolve_token()?;
    let bot = Bot::new(config)?;

    let mut messages = bot.subscribe("message", 256);
    let mut lifecycle = bot.lifecycle();
    let handle = bot.start();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
            Some(event) = messages.recv() => {
                if let Some(message) = &event.message {
                    info!(
                        event = %event.name,
                        user_id = %message.user_id,
                        "{}",
                        message.brief
                    );
                }
            }
            event = lifecycle.recv() => match event {
                Ok(LifecycleEvent::Dead { reason }) => {
                    break Err(anyhow::anyhow!("gateway session died: {reason}"));
                }
                Ok(LifecycleEvent::Disconnected { code, reason, .. }) => {
                    warn!(code = ?code, "Disconnected: {reason}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Lifecycle events lagged");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    handle.shutdown().await;
    info!("Cordgate stopped");
    outcome
}
