use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use map_reduce_rs::mr::coordinator::{run_reaper, Coordinator, Server};
use tarpc::{server::incoming::Incoming, tokio_serde::formats::Json};
use tokio::time::sleep;
use tracing::info;

/// Drives input files through a Map phase and a Reduce phase, then exits.
#[derive(Parser, Debug)]
#[command(name = "mrcoordinator")]
struct Args {
    /// Input files to map, one Map task per file.
    files: Vec<PathBuf>,

    /// Number of reduce tasks / output files.
    #[arg(short = 'r', long, default_value_t = 10)]
    reduce: i64,

    /// Address to listen for worker RPCs on.
    #[arg(long, default_value = "127.0.0.1:1030")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let files: Vec<String> = args
        .files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    info!(
        map_tasks = files.len(),
        reduce_tasks = args.reduce,
        bind = %args.bind,
        "starting coordinator"
    );

    let coordinator = Coordinator::new(files, args.reduce);

    tokio::spawn(run_reaper(coordinator.clone()));

    let server_transport = tarpc::serde_transport::tcp::listen(args.bind, Json::default).await?;
    let serving_coordinator = coordinator.clone();
    tokio::spawn(
        server_transport
            .filter_map(|r| async { r.ok() })
            .map(tarpc::server::BaseChannel::with_defaults)
            .execute(serving_coordinator.serve()),
    );

    info!("coordinator RPC server is listening, waiting for workers to connect");

    while !coordinator.done() {
        sleep(Duration::from_secs(1)).await;
    }

    info!("all reduce tasks completed, coordinator exiting");
    Ok(())
}
