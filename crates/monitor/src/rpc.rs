use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::{Address, Filter, Log};
use reqwest::Url;
use thiserror::Error;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid rpc url `{0}`")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("provider returned a log from {found:#x}, expected {expected:#x}")]
    ForeignLog { expected: Address, found: Address },
}

impl From<reqwest::Error> for RpcError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Read-only view of a chain: head height and contract logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;
    async fn get_logs(&self, contract: Address, from: u64, to: u64) -> Result<Vec<Log>, RpcError>;
}

/// Produces a fresh [`LogSource`] for every scan session so nothing from a
/// stalled connection survives a reconnect.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    type Source: LogSource;

    async fn connect(&self) -> Result<Self::Source, RpcError>;
}

/// Connects to an HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    rpc_url: String,
}

impl HttpConnector {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
        }
    }
}

#[async_trait]
impl ChainConnector for HttpConnector {
    type Source = EvmRpcClient<Http>;

    async fn connect(&self) -> Result<Self::Source, RpcError> {
        let endpoint =
            Url::parse(&self.rpc_url).map_err(|_| RpcError::InvalidUrl(self.rpc_url.clone()))?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        EvmRpcClient::from_provider(Provider::new(Http::new_with_client(endpoint, http))).await
    }
}

pub struct EvmRpcClient<P> {
    provider: Provider<P>,
}

impl<P> EvmRpcClient<P>
where
    P: JsonRpcClient + 'static,
{
    /// Wraps `provider` after probing it with `eth_chainId`.
    pub async fn from_provider(provider: Provider<P>) -> Result<Self, RpcError> {
        let chain_id = provider.get_chainid().await?;
        info!(chain_id = chain_id.low_u64(), "connected to rpc endpoint");
        Ok(Self { provider })
    }
}

#[async_trait]
impl<P> LogSource for EvmRpcClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    // The caller bounds the range; providers reject oversized queries.
    async fn get_logs(&self, contract: Address, from: u64, to: u64) -> Result<Vec<Log>, RpcError> {
        let filter = Filter::new()
            .address(contract)
            .from_block(from)
            .to_block(to);
        let logs = self.provider.get_logs(&filter).await?;

        if let Some(log) = logs.iter().find(|log| log.address != contract) {
            return Err(RpcError::ForeignLog {
                expected: contract,
                found: log.address,
            });
        }
        Ok(logs)
    }
}
