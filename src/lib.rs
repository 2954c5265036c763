use std::net::SocketAddr;

use clap::Parser;
use cli::CliCmd;
use node::EthNodeConnector;
use rpc::{start_server, PriceFeed};
use tracing::info;

pub mod aux;
pub mod cli;
pub mod contracts;
pub mod errors;
pub mod handler;
pub mod node;
pub mod pools;
pub mod rpc;
pub mod utils;

pub fn run() -> eyre::Result<()> {
    let cli = CliCmd::parse();
    aux::init(cli.verbosity.directive()?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(serve(cli))
}

async fn serve(cli: CliCmd) -> eyre::Result<()> {
    let feed = PriceFeed::new(EthNodeConnector, cli.feed_config());
    let (addr, handle) = start_server(SocketAddr::new(cli.host, cli.port), feed).await?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!(target: "dex_stream", %addr, "shutting down rpc server");
            if handle.stop().is_ok() {
                handle.stopped().await;
            }
        }
        _ = handle.clone().stopped() => {
            info!(target: "dex_stream", %addr, "rpc server stopped");
        }
    }

    Ok(())
}
