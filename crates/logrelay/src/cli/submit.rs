//! `logrelay submit`: publish a processing request for uploaded files.

use anyhow::{Context, Result};
use logrelay_broker::{BrokerArgs, ZmqBroker};
use logrelay_gateway::submit;
use logrelay_protocol::defaults::{DEFAULT_PROCESSING_TOPIC, DEFAULT_UPLOAD_DIR};
use std::path::PathBuf;
use std::time::Duration;

/// PUB sockets drop messages until the forwarder's subscription reaches them.
const PUBLISH_SETTLE: Duration = Duration::from_millis(300);

#[derive(clap::Args, Debug, Clone)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[arg(long, env = "LOGRELAY_PROCESSING_TOPIC", default_value = DEFAULT_PROCESSING_TOPIC)]
    pub processing_topic: String,

    #[arg(long, env = "LOGRELAY_UPLOAD_DIR", default_value = DEFAULT_UPLOAD_DIR)]
    pub upload_dir: PathBuf,

    /// Client id to tag events with (default: current timestamp)
    #[arg(long)]
    pub client_id: Option<String>,

    /// File names inside the upload directory
    #[arg(required = true)]
    pub files: Vec<String>,
}

pub async fn run(args: SubmitArgs) -> Result<()> {
    let broker = ZmqBroker::connect(args.broker.into())
        .await
        .context("Failed to connect to broker")?;
    tokio::time::sleep(PUBLISH_SETTLE).await;

    let request = submit(
        &broker,
        &args.processing_topic,
        &args.upload_dir,
        &args.files,
        args.client_id,
    )
    .await
    .context("Submit failed")?;

    println!("{}", request.client_id);
    Ok(())
}
