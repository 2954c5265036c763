use alloy_primitives::{Address, TxKind, U160};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::{BlockId, TransactionInput, TransactionRequest};
use alloy_sol_types::SolCall;
use alloy_transport::TransportError;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::{
    contracts::{UniswapV3, ERC20Bytes32, ERC20},
    errors::{ContractStateError, StreamError},
    pools::TokenMetadata,
    utils::bytes32_to_string,
};

/// Read-only access to the pool contract and its tokens.
///
/// Contract reads take the block they should be executed against, a tick
/// reads its price at the height it fetched in the same tick.
#[async_trait]
pub trait ChainStateReader: Send + Sync {
    async fn current_height(&self) -> Result<u64, StreamError>;

    async fn chain_id(&self) -> Result<u64, StreamError>;

    /// metadata of `(token0, token1)` of the pool
    async fn token_metadata(
        &self,
        pool: Address,
        block_number: u64,
    ) -> Result<(TokenMetadata, TokenMetadata), StreamError>;

    /// `sqrtPriceX96` from the pool's `slot0()`
    async fn packed_price_state(
        &self,
        pool: Address,
        block_number: u64,
    ) -> Result<U160, StreamError>;
}

/// Opens a reader for the endpoint a subscription asked for.
pub trait ChainConnector: Send + Sync + 'static {
    type Reader: ChainStateReader + 'static;

    fn connect(&self, endpoint: &Url) -> Result<Self::Reader, StreamError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EthNodeConnector;

impl ChainConnector for EthNodeConnector {
    type Reader = EthNodeApi;

    fn connect(&self, endpoint: &Url) -> Result<Self::Reader, StreamError> {
        match endpoint.scheme() {
            "http" | "https" => Ok(EthNodeApi::new(endpoint.clone())),
            scheme => Err(StreamError::InvalidRequest(format!(
                "unsupported endpoint scheme '{scheme}', expected http(s)"
            ))),
        }
    }
}

/// [ChainStateReader] over an eth json-rpc endpoint.
#[derive(Clone)]
pub struct EthNodeApi {
    provider: DynProvider,
}

impl EthNodeApi {
    pub fn new(endpoint: Url) -> Self {
        let provider = ProviderBuilder::new().connect_http(endpoint).erased();

        Self { provider }
    }

    async fn token_info(
        &self,
        token: Address,
        block_number: u64,
    ) -> Result<TokenMetadata, StreamError> {
        let decimals = self
            .make_call_request(ERC20::decimalsCall {}, token, block_number)
            .await?;
        let name = self.token_name(token, block_number).await?;

        Ok(TokenMetadata::new(token, name, decimals))
    }

    /// `name()` as a string, then as a `bytes32`, then `symbol()`
    async fn token_name(&self, token: Address, block_number: u64) -> Result<String, StreamError> {
        match self
            .make_call_request(ERC20::nameCall {}, token, block_number)
            .await
        {
            Ok(name) if !name.is_empty() => return Ok(name),
            Err(StreamError::Connectivity(e)) => return Err(StreamError::Connectivity(e)),
            _ => (),
        }

        if let Ok(name) = self
            .make_call_request(ERC20Bytes32::nameCall {}, token, block_number)
            .await
        {
            if let Some(name) = bytes32_to_string(name) {
                return Ok(name);
            }
        }

        debug!(target: "dex_stream::node", ?token, "token has no readable name, falling back to symbol");

        match self
            .make_call_request(ERC20::symbolCall {}, token, block_number)
            .await
        {
            Ok(symbol) if !symbol.is_empty() => Ok(symbol),
            Err(StreamError::Connectivity(e)) => Err(StreamError::Connectivity(e)),
            _ => Err(ContractStateError::MissingTokenName(token).into()),
        }
    }

    async fn make_call_request<C: SolCall>(
        &self,
        call: C,
        to: Address,
        block_number: u64,
    ) -> Result<C::Return, StreamError> {
        let encoded = call.abi_encode();
        let req = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(encoded.into()),
            ..Default::default()
        };

        let res = self
            .provider
            .call(req)
            .block(BlockId::number(block_number))
            .await
            .map_err(|e| call_error(to, e))?;

        Ok(C::abi_decode_returns(&res)?)
    }
}

/// An error response to `eth_call` is the contract refusing the call, only a
/// failed round trip is a connectivity problem.
fn call_error(to: Address, e: TransportError) -> StreamError {
    match e.as_error_resp() {
        Some(resp) => ContractStateError::Reverted { to, message: resp.message.to_string() }.into(),
        None => StreamError::Connectivity(e),
    }
}

#[async_trait]
impl ChainStateReader for EthNodeApi {
    async fn current_height(&self) -> Result<u64, StreamError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn chain_id(&self) -> Result<u64, StreamError> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn token_metadata(
        &self,
        pool: Address,
        block_number: u64,
    ) -> Result<(TokenMetadata, TokenMetadata), StreamError> {
        let token0 = self
            .make_call_request(UniswapV3::token0Call {}, pool, block_number)
            .await?;
        let token1 = self
            .make_call_request(UniswapV3::token1Call {}, pool, block_number)
            .await?;

        let (token0, token1) = futures::try_join!(
            self.token_info(token0, block_number),
            self.token_info(token1, block_number)
        )?;

        Ok((token0, token1))
    }

    async fn packed_price_state(
        &self,
        pool: Address,
        block_number: u64,
    ) -> Result<U160, StreamError> {
        let slot0 = self
            .make_call_request(UniswapV3::slot0Call {}, pool, block_number)
            .await?;

        Ok(slot0.sqrtPriceX96)
    }
}
