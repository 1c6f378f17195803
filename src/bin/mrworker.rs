use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use map_reduce_rs::mr::coordinator::ServerClient;
use map_reduce_rs::mr::function::wc::{WordCountMap, WordCountReduce};
use map_reduce_rs::mr::worker;
use tarpc::{client, tokio_serde::formats::Json};
use tracing::{error, info};

/// Polls a coordinator for Map/Reduce tasks and executes them until told to exit.
#[derive(Parser, Debug)]
#[command(name = "mrworker")]
struct Args {
    /// Coordinator address to connect to.
    #[arg(long, default_value = "127.0.0.1:1030")]
    connect: SocketAddr,

    /// Directory intermediate and output files are published to. Must be
    /// the same path on every worker sharing this job.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let client_transport = match tarpc::serde_transport::tcp::connect(args.connect, Json::default).await {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, address = %args.connect, "failed to connect to coordinator, exiting");
            return Ok(());
        }
    };

    let client = ServerClient::new(client::Config::default(), client_transport).spawn();
    info!(address = %args.connect, "connected to coordinator");

    worker::run(
        client,
        args.work_dir,
        Arc::new(WordCountMap),
        Arc::new(WordCountReduce),
    )
    .await?;

    Ok(())
}
