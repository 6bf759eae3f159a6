//! Chain Client Pool (C1): multi-endpoint WebSocket + HTTP connection
//! management with failover.
//!
//! `subscribe_headers` walks the WS endpoint list until one accepts a
//! subscription; `fetch_block` walks the HTTP endpoint list under the retry
//! policy in [`crate::chain::retry`].

use alloy::network::BlockResponse;
use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::rpc::types::{Block, BlockTransactionsKind};
use alloy::transports::http::{Client, Http};
use eyre::{eyre, Result, WrapErr};
use futures::Stream;
use tracing::{error, warn};

use crate::chain::retry::{FetchRetryConfig, FetchStrategy};

/// Split a comma-separated RPC endpoint string (`chain.rpc_urls` /
/// `chain.ws_urls` in config.rs) into individual trimmed URLs, dropping any
/// empty segments left by a trailing comma.
pub fn split_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Build one alloy HTTP provider per configured RPC endpoint. `fetch_block`
/// and `current_block_number` walk this list in order on failure.
fn build_http_providers(urls: &[String]) -> Result<Vec<RootProvider<Http<Client>>>> {
    if urls.is_empty() {
        return Err(eyre!("At least one RPC URL is required"));
    }
    urls.iter()
        .map(|url| {
            let parsed = url
                .parse()
                .wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
            Ok(ProviderBuilder::new().on_http(parsed))
        })
        .collect()
}

/// A block to fetch, identified by number and (if known) hash. Headers
/// delivered over the WS subscription carry both; gap catch-up only knows
/// the number.
#[derive(Debug, Clone, Copy)]
pub struct BlockRef {
    pub number: u64,
    pub hash: Option<B256>,
}

impl BlockRef {
    pub fn by_number(number: u64) -> Self {
        Self { number, hash: None }
    }

    pub fn new(number: u64, hash: B256) -> Self {
        Self {
            number,
            hash: Some(hash),
        }
    }
}

/// Holds ordered HTTP and WebSocket endpoint lists for one chain.
pub struct ChainClientPool {
    http_providers: Vec<RootProvider<Http<Client>>>,
    http_urls: Vec<String>,
    ws_urls: Vec<String>,
    retry: FetchRetryConfig,
}

impl ChainClientPool {
    pub fn new(rpc_urls: &[String], ws_urls: &[String]) -> Result<Self> {
        if ws_urls.is_empty() {
            return Err(eyre!("At least one WebSocket endpoint is required"));
        }
        let http_providers = build_http_providers(rpc_urls)?;
        Ok(Self {
            http_providers,
            http_urls: rpc_urls.to_vec(),
            ws_urls: ws_urls.to_vec(),
            retry: FetchRetryConfig::default(),
        })
    }

    /// Try each WS endpoint in order until one accepts a block-header
    /// subscription. The connection is established fresh on every call;
    /// reconnection on drop is the Block Follower's responsibility.
    pub async fn subscribe_headers(
        &self,
    ) -> Result<impl Stream<Item = alloy::rpc::types::Header>> {
        let mut last_err = None;
        for url in &self.ws_urls {
            let connect = WsConnect::new(url.clone());
            let provider = match ProviderBuilder::new().on_ws(connect).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(endpoint = %url, error = %e, "websocket connect failed");
                    last_err = Some(e.into());
                    continue;
                }
            };
            match provider.subscribe_blocks().await {
                Ok(sub) => return Ok(sub.into_stream()),
                Err(e) => {
                    warn!(endpoint = %url, error = %e, "header subscription failed");
                    last_err = Some(e.into());
                }
            }
        }
        Err(last_err.unwrap_or_else(|| eyre!("no websocket endpoints configured")))
    }

    /// Fetch a full block (with transactions) under the retry policy: up to
    /// 5 attempts, exponential backoff 1s capped at 10s, falling back from
    /// hash-based to number-based fetch on the 2nd and 4th attempt, rotating
    /// to a different endpoint on the 3rd.
    pub async fn fetch_block(&self, block_ref: BlockRef) -> Result<Block> {
        let by_hash = block_ref.hash.is_some();
        let mut last_err = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff_for_attempt(attempt - 1)).await;
            }

            let strategy = self
                .retry
                .strategy_for_attempt(attempt, self.http_providers.len(), by_hash);

            let (endpoint_idx, result) = match strategy {
                FetchStrategy::ByHash { endpoint } => {
                    let hash = block_ref.hash.expect("by_hash strategy implies a hash");
                    (
                        endpoint,
                        self.http_providers[endpoint]
                            .get_block_by_hash(hash, BlockTransactionsKind::Full)
                            .await,
                    )
                }
                FetchStrategy::ByNumber { endpoint } => (
                    endpoint,
                    self.http_providers[endpoint]
                        .get_block_by_number(block_ref.number.into(), BlockTransactionsKind::Full)
                        .await,
                ),
            };

            match result {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => {
                    let msg = format!("block {} not found", block_ref.number);
                    self.retry.log_attempt_failed(
                        attempt,
                        &self.http_urls[endpoint_idx],
                        &msg,
                    );
                    last_err = Some(eyre!(msg));
                }
                Err(e) => {
                    self.retry.log_attempt_failed(
                        attempt,
                        &self.http_urls[endpoint_idx],
                        &e.to_string(),
                    );
                    last_err = Some(e.into());
                }
            }
        }

        let err = last_err.unwrap_or_else(|| eyre!("block fetch exhausted with no error"));
        error!(
            block_number = block_ref.number,
            endpoints = ?self.http_urls,
            "block fetch exhausted all retries"
        );
        Err(err)
    }

    pub async fn current_block_number(&self) -> Result<u64> {
        let mut last_err = None;
        for (idx, provider) in self.http_providers.iter().enumerate() {
            match provider.get_block_number().await {
                Ok(n) => return Ok(n),
                Err(e) => {
                    warn!(endpoint = %self.http_urls[idx], error = %e, "get_block_number failed");
                    last_err = Some(e.into());
                }
            }
        }
        Err(last_err.unwrap_or_else(|| eyre!("no http endpoints configured")))
    }

    /// The HTTP URL at `index`, used by callers (the HD Wallet Vault) that
    /// need to build their own wallet-attached provider for signing.
    pub fn http_url(&self, index: usize) -> Option<&str> {
        self.http_urls.get(index).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ref_by_number_has_no_hash() {
        let r = BlockRef::by_number(42);
        assert_eq!(r.number, 42);
        assert!(r.hash.is_none());
    }

    #[test]
    fn test_pool_requires_ws_endpoint() {
        let result = ChainClientPool::new(&["http://localhost:8545".to_string()], &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_endpoint_list_single() {
        let urls = split_endpoint_list("https://bsc.publicnode.com");
        assert_eq!(urls, vec!["https://bsc.publicnode.com"]);
    }

    #[test]
    fn test_split_endpoint_list_multiple() {
        let urls = split_endpoint_list(
            "https://bsc.publicnode.com,https://bsc-dataseed1.binance.org,https://binance.llamarpc.com",
        );
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "https://bsc.publicnode.com");
        assert_eq!(urls[1], "https://bsc-dataseed1.binance.org");
        assert_eq!(urls[2], "https://binance.llamarpc.com");
    }

    #[test]
    fn test_split_endpoint_list_trims_whitespace() {
        let urls = split_endpoint_list(" https://a.com , https://b.com , https://c.com ");
        assert_eq!(
            urls,
            vec!["https://a.com", "https://b.com", "https://c.com"]
        );
    }

    #[test]
    fn test_split_endpoint_list_ignores_empty_segments() {
        let urls = split_endpoint_list("https://a.com,,https://b.com,");
        assert_eq!(urls, vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn test_split_endpoint_list_empty_string() {
        assert!(split_endpoint_list("").is_empty());
    }

    #[test]
    fn test_build_http_providers_single() {
        let providers = build_http_providers(&["http://localhost:8545".to_string()]).unwrap();
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn test_build_http_providers_multiple() {
        let providers = build_http_providers(&[
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ])
        .unwrap();
        assert_eq!(providers.len(), 2);
    }

    #[test]
    fn test_build_http_providers_empty_fails() {
        assert!(build_http_providers(&[]).is_err());
    }
}
