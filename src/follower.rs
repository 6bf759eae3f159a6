//! Block Follower (C4): subscribes to new chain heads over WebSocket, walks
//! every transaction in each block for ERC-20 transfers into a tracked
//! address, and hands candidates off to the AML Evaluator and Confirmation
//! Tracker.
//!
//! The per-transaction extraction (selector check, recipient/amount
//! decoding) follows the shape of the operator's EVM deposit watcher
//! (`watchers/evm.rs::parse_deposit_log`), adapted from log-topic decoding
//! to plain ERC-20 `transfer(address,uint256)` calldata decoding.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::network::{BlockResponse, TransactionResponse};
use alloy::primitives::{Address, U256};
use alloy::rpc::types::{Block, BlockTransactions, Header, Transaction};
use eyre::{Result, WrapErr};
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::aml::AmlEvaluator;
use crate::chain::{BlockRef, ChainClientPool};
use crate::confirmation::ConfirmationTracker;
use crate::db;
use crate::db::models::NewTransfer;
use crate::registry::AddressRegistry;
use crate::wallet::TRANSFER_SELECTOR;

/// Default delay before re-establishing a dropped header subscription.
const DEFAULT_SUBSCRIPTION_RETRY_DELAY_SECS: u64 = 10;

/// Follows chain heads and extracts deposits into tracked wallet addresses.
pub struct BlockFollower {
    chain: Arc<ChainClientPool>,
    registry: Arc<AddressRegistry>,
    aml: Arc<AmlEvaluator>,
    confirmations: Arc<ConfirmationTracker>,
    pool: PgPool,
    chain_id: i64,
    token_contract: Address,
    subscription_retry_delay: Duration,
}

impl BlockFollower {
    pub fn new(
        chain: Arc<ChainClientPool>,
        registry: Arc<AddressRegistry>,
        aml: Arc<AmlEvaluator>,
        confirmations: Arc<ConfirmationTracker>,
        pool: PgPool,
        chain_id: i64,
        token_contract: &str,
    ) -> Result<Self> {
        let token_contract = Address::from_str(token_contract)
            .wrap_err("invalid token contract address")?;
        Ok(Self {
            chain,
            registry,
            aml,
            confirmations,
            pool,
            chain_id,
            token_contract,
            subscription_retry_delay: Duration::from_secs(DEFAULT_SUBSCRIPTION_RETRY_DELAY_SECS),
        })
    }

    /// Run forever: subscribe, catch up any gap, stream new heads, and
    /// reconnect with a delay whenever the subscription drops.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "block follower subscription failed, retrying");
            }
            tokio::time::sleep(self.subscription_retry_delay).await;
        }
    }

    async fn run_once(&self) -> Result<()> {
        let mut headers = self.chain.subscribe_headers().await?;
        info!("block follower subscribed to new heads");

        while let Some(header) = headers.next().await {
            if let Err(e) = self.handle_new_head(&header).await {
                error!(block_number = header.number, error = %e, "failed to process new head, dropping it");
            }
        }

        warn!("head subscription stream ended");
        Ok(())
    }

    /// Catch up any gap since the last processed block, then process the
    /// newly arrived head itself.
    async fn handle_new_head(&self, header: &Header) -> Result<()> {
        let last = db::last_processed_block(&self.pool, self.chain_id)
            .await?
            .unwrap_or(header.number as i64 - 1);

        let mut next = last + 1;
        while next < header.number as i64 {
            self.process_block(BlockRef::by_number(next as u64)).await?;
            db::update_last_processed_block(&self.pool, self.chain_id, next).await?;
            next += 1;
        }

        self.process_block(BlockRef::new(header.number, header.hash)).await?;
        db::update_last_processed_block(&self.pool, self.chain_id, header.number as i64).await?;
        Ok(())
    }

    async fn process_block(&self, block_ref: BlockRef) -> Result<()> {
        let block = self.chain.fetch_block(block_ref).await?;
        let candidates = extract_candidates(&block, self.token_contract);

        for candidate in candidates {
            if !self.registry.is_tracked(&candidate.recipient) {
                continue;
            }

            info!(
                tx_hash = %candidate.tx_hash,
                recipient = %candidate.recipient,
                amount = %candidate.amount_units,
                "deposit candidate detected"
            );

            db::insert_transfer(
                &self.pool,
                &NewTransfer {
                    tx_hash: candidate.tx_hash.clone(),
                    wallet_address: candidate.recipient.clone(),
                    source_address: candidate.sender.clone(),
                    amount_units: candidate.amount_units.clone(),
                    block_number: candidate.block_number as i64,
                },
            )
            .await?;

            if let Err(e) = self
                .aml
                .evaluate_transaction(
                    &candidate.tx_hash,
                    &candidate.recipient,
                    &candidate.sender,
                    &candidate.amount_units,
                )
                .await
            {
                error!(tx_hash = %candidate.tx_hash, error = %e, "AML evaluation failed");
            }

            self.confirmations
                .track(candidate.tx_hash.clone(), candidate.block_number);
        }

        Ok(())
    }
}

/// A decoded ERC-20 `transfer` call into a (possibly untracked) address.
struct DepositCandidate {
    tx_hash: String,
    sender: String,
    recipient: String,
    amount_units: String,
    block_number: u64,
}

/// Walk every transaction in `block`, keeping only direct calls to
/// `token_contract` whose calldata is a well-formed ERC-20 `transfer`.
fn extract_candidates(block: &Block, token_contract: Address) -> Vec<DepositCandidate> {
    let block_number = block.header().number;
    let transactions: &BlockTransactions<Transaction> = block.transactions();
    let Some(txns) = transactions.as_transactions() else {
        return Vec::new();
    };

    txns.iter()
        .filter_map(|tx| decode_transfer(tx, token_contract, block_number))
        .collect()
}

fn decode_transfer(
    tx: &Transaction,
    token_contract: Address,
    block_number: u64,
) -> Option<DepositCandidate> {
    let to = tx.to()?;
    if to != token_contract {
        return None;
    }

    let input = &tx.input().0;
    if input.len() < 68 {
        return None;
    }
    if input[0..4] != TRANSFER_SELECTOR {
        return None;
    }

    let recipient = Address::from_slice(&input[16..36]);
    let amount = U256::from_be_slice(&input[36..68]);

    Some(DepositCandidate {
        tx_hash: format!("{:?}", tx.tx_hash()),
        sender: format!("{:?}", tx.from()),
        recipient: format!("{:?}", recipient),
        amount_units: amount.to_string(),
        block_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_selector_matches_known_value() {
        assert_eq!(TRANSFER_SELECTOR, [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_short_calldata_is_rejected() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb];
        assert!(input.len() < 68);
    }
}
