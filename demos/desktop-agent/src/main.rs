//! Headless desktop agent.
//!
//! Run with: cargo run -p desktop-agent -- run --folder ~/Documents
//!
//! Pair first with `desktop-agent pair <CODE>` using the code shown in the
//! web app.

mod tools;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use desktop_agent_core::AgentEvent;
use desktop_agent_session::{AgentConfig, AuthState, DesktopAgent};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "desktop-agent", version, about = "Lets the web app read scoped local folders")]
struct Cli {
    /// Config file (TOML). Defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect and serve tool requests until interrupted.
    Run {
        /// Folder the service may read. Repeatable; adds to the config file.
        #[arg(long = "folder")]
        folders: Vec<String>,
        /// Device name shown in the web app.
        #[arg(long)]
        name: Option<String>,
    },
    /// Pair this device with a code from the web app.
    Pair { code: String },
    /// Show endpoint and credential state.
    Status,
    /// Forget the stored credential.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let agent = DesktopAgent::from_config(config, Arc::new(tools::executor()), None)
        .context("building agent")?;

    match cli.command {
        Command::Run { folders, name } => run(agent, &folders, name.as_deref()).await,
        Command::Pair { code } => {
            agent.claim_pairing_code(&code).await?;
            println!("Paired. Start the agent with `desktop-agent run`.");
            agent.shutdown().await;
            Ok(())
        }
        Command::Status => {
            let token = agent.stored_token().await?;
            println!("Endpoint:    {} ({})", agent.ws_url(), agent.environment_label());
            println!("Device:      {}", agent.device_name());
            println!("Credential:  {}", if token.is_some() { "stored" } else { "none" });
            println!("Folders:     {}", agent.scoped_folders().join(", "));
            Ok(())
        }
        Command::Logout => {
            agent.clear_token().await?;
            println!("Signed out.");
            Ok(())
        }
    }
}

async fn run(agent: DesktopAgent, folders: &[String], name: Option<&str>) -> anyhow::Result<()> {
    for folder in folders {
        agent
            .add_scoped_folder(folder)
            .with_context(|| format!("invalid folder {folder}"))?;
    }
    if let Some(name) = name {
        agent.set_device_name(name)?;
    }
    if agent.scoped_folders().is_empty() {
        tracing::warn!("no scoped folders; every file request will be refused");
    }

    let mut events = agent.events();
    if agent.start().await? == AuthState::Unauthenticated {
        bail!("this device is not paired; run `desktop-agent pair <CODE>` first");
    }

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(AgentEvent::StatusChanged { status, device_id, .. }) => {
                    tracing::info!(device_id = ?device_id, "{status}");
                }
                Some(AgentEvent::CredentialInvalid) => {
                    tracing::error!("device was revoked; pair again to continue");
                    break;
                }
                Some(AgentEvent::ToolCompleted { request_id, status }) => {
                    tracing::info!(%request_id, ?status, "tool finished");
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}
