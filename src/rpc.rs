use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use jsonrpsee::{
    core::SubscriptionResult,
    proc_macros::rpc,
    server::{ServerBuilder, ServerHandle},
    PendingSubscriptionSink, SubscriptionMessage, SubscriptionSink,
};
use tracing::{info, warn};

use crate::{
    errors::StreamError,
    handler::{PriceSession, PriceSink, SessionConfig},
    node::ChainConnector,
    pools::{PriceUpdate, StreamContractRequest},
};

#[rpc(server, client, namespace = "dex")]
pub trait PriceFeedApi {
    /// Streams the spot price of a pool every time it changes. The
    /// subscription is rejected if the pool can't be read at all.
    #[subscription(
        name = "streamContract",
        unsubscribe = "unstreamContract",
        item = PriceUpdate
    )]
    async fn stream_contract(&self, contract: StreamContractRequest) -> SubscriptionResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceFeedConfig {
    pub min_scrape_interval: Duration,
    pub session: SessionConfig,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            min_scrape_interval: Duration::from_millis(100),
            session: SessionConfig::default(),
        }
    }
}

pub struct PriceFeed<C> {
    connector: C,
    config: PriceFeedConfig,
}

impl<C: ChainConnector> PriceFeed<C> {
    pub fn new(connector: C, config: PriceFeedConfig) -> Self {
        Self { connector, config }
    }

    async fn open_session(
        &self,
        contract: StreamContractRequest,
    ) -> Result<PriceSession<C::Reader>, StreamError> {
        let pool = contract.into_pool_reference(self.config.min_scrape_interval)?;
        let reader = self.connector.connect(&pool.endpoint)?;

        PriceSession::init(reader, pool, self.config.session).await
    }
}

#[async_trait]
impl<C: ChainConnector> PriceFeedApiServer for PriceFeed<C> {
    async fn stream_contract(
        &self,
        pending: PendingSubscriptionSink,
        contract: StreamContractRequest,
    ) -> SubscriptionResult {
        let address = contract.address.clone();

        let session = match self.open_session(contract).await {
            Ok(session) => session,
            Err(e) => {
                warn!(target: "dex_stream::rpc", pool = %address, "rejected subscription - {e}");
                pending.reject(e).await;
                return Ok(());
            }
        };

        let sink = SubscriptionPriceSink(pending.accept().await?);
        info!(target: "dex_stream::rpc", pool = %address, subscription = ?sink.0.subscription_id(), "accepted subscription");

        session.run(&sink).await?;

        Ok(())
    }
}

struct SubscriptionPriceSink(SubscriptionSink);

#[async_trait]
impl PriceSink for SubscriptionPriceSink {
    async fn send(&self, update: PriceUpdate) -> Result<(), StreamError> {
        let message = SubscriptionMessage::from_json(&update)
            .map_err(|e| StreamError::Transport(format!("failed to serialize update - {e}")))?;

        self.0
            .send(message)
            .await
            .map_err(|_| StreamError::Transport("subscription closed".to_string()))
    }

    async fn closed(&self) {
        self.0.closed().await
    }
}

/// Binds the rpc server and starts serving the price feed.
pub async fn start_server<C: ChainConnector>(
    addr: SocketAddr,
    feed: PriceFeed<C>,
) -> eyre::Result<(SocketAddr, ServerHandle)> {
    let server = ServerBuilder::default().build(addr).await?;
    let local_addr = server.local_addr()?;

    let handle = server.start(feed.into_rpc());
    info!(target: "dex_stream::rpc", addr = %local_addr, "rpc server listening");

    Ok((local_addr, handle))
}
