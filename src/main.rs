//! ovirt-imager command line entry point.
//!
//! Subcommands:
//! - build: run a full image build from a JSON config file
//! - schema: print the config file JSON Schema
//! - destroy: remove a disk produced by an earlier build

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ovirt_imager::client::ovirt::OvirtClient;
use ovirt_imager::types::DiskId;
use ovirt_imager::ui::TracingUi;
use ovirt_imager::{Artifact, BuildConfig, Builder, Error, Result};

#[derive(Debug, Parser)]
#[command(name = "ovirt-imager", version, about = "Build disk images on oVirt")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an image build.
    Build {
        /// JSON config file.
        #[arg(short, long, env = "OVIRT_IMAGER_CONFIG")]
        config: PathBuf,
    },
    /// Print the config file JSON Schema.
    Schema,
    /// Remove a disk produced by an earlier build.
    Destroy {
        #[arg(short, long, env = "OVIRT_IMAGER_CONFIG")]
        config: PathBuf,

        #[arg(long)]
        disk_id: String,
    },
}

fn load_config(path: &Path) -> Result<BuildConfig> {
    let mut config = BuildConfig::load(path)?;
    config.prepare()?;
    Ok(config)
}

async fn build(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("signal_received: cancelling build");
            on_signal.cancel();
        }
    });

    let builder = Builder::connect(config, Arc::new(TracingUi))?.with_cancellation(cancel);
    match builder.run().await? {
        Some(artifact) => {
            println!("{}", artifact);
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
        None => println!("Build finished without an artifact"),
    }
    Ok(())
}

async fn destroy(path: PathBuf, disk_id: String) -> Result<()> {
    let config = load_config(&path)?;
    let client = OvirtClient::new(&config.access)?;
    let disk_id = DiskId::from_string(disk_id).map_err(Error::validation)?;
    Artifact::new(disk_id).destroy(&client).await
}

#[tokio::main]
async fn main() -> ExitCode {
    ovirt_imager::observability::init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Build { config } => build(config).await,
        Command::Schema => serde_json::to_string_pretty(&BuildConfig::json_schema())
            .map(|schema| println!("{}", schema))
            .map_err(Error::from),
        Command::Destroy { config, disk_id } => destroy(config, disk_id).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_interrupted() => {
            eprintln!("Build was cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
