use clap::Parser;
use dex_price_stream::{aux, cli::ClientCmd, rpc::PriceFeedApiClient};
use futures::StreamExt;
use jsonrpsee::ws_client::WsClientBuilder;
use tracing::{error, info};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();

    let cli = ClientCmd::parse();
    aux::init(cli.verbosity.directive()?);

    let client = WsClientBuilder::default().build(cli.server_url()).await?;
    info!(target: "dex_stream::client", server = %cli.server_url(), "connected");

    let mut sub = client.stream_contract(cli.request()).await?;

    while let Some(update) = sub.next().await {
        match update {
            Ok(update) => info!(
                target: "dex_stream::client",
                token0 = %update.token0,
                token1 = %update.token1,
                price = update.spot_price,
                block = update.block_height,
                timestamp = %update.timestamp,
                "price update"
            ),
            Err(e) => {
                error!(target: "dex_stream::client", "stream interrupted - {e}");
                break;
            }
        }
    }

    info!(target: "dex_stream::client", "stream closed");

    Ok(())
}
