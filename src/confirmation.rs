//! Confirmation Tracker (C6): watches a candidate transfer until it has
//! accrued `chain.required_confirmations` blocks, then marks it confirmed.
//!
//! Bounded concurrency is gated with a `tokio::sync::Semaphore`, mirroring
//! the operator's metrics server connection limiter
//! (`packages/operator/src/metrics.rs::METRICS_MAX_CONNECTIONS`), so a burst
//! of candidates detected by the Block Follower can't spawn an unbounded
//! number of waiters.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::chain::ChainClientPool;
use crate::db;

/// Spawns and bounds per-candidate confirmation waiters.
pub struct ConfirmationTracker {
    chain: Arc<ChainClientPool>,
    pool: PgPool,
    semaphore: Arc<Semaphore>,
    required_confirmations: u64,
    poll_interval: Duration,
}

impl ConfirmationTracker {
    pub fn new(
        chain: Arc<ChainClientPool>,
        pool: PgPool,
        required_confirmations: u64,
        poll_interval_secs: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            chain,
            pool,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            required_confirmations,
            poll_interval: Duration::from_secs(poll_interval_secs),
        }
    }

    /// Spawn a waiter for `tx_hash` at `candidate_block`. Returns immediately;
    /// the waiter runs on its own task and acquires a permit before polling.
    pub fn track(&self, tx_hash: String, candidate_block: u64) {
        let chain = self.chain.clone();
        let pool = self.pool.clone();
        let semaphore = self.semaphore.clone();
        let required_confirmations = self.required_confirmations;
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            if let Err(e) = wait_for_confirmation(
                &chain,
                &pool,
                &tx_hash,
                candidate_block,
                required_confirmations,
                poll_interval,
            )
            .await
            {
                warn!(tx_hash = %tx_hash, error = %e, "confirmation wait failed");
            }
        });
    }
}

async fn wait_for_confirmation(
    chain: &ChainClientPool,
    pool: &PgPool,
    tx_hash: &str,
    candidate_block: u64,
    required_confirmations: u64,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        let tip = chain.current_block_number().await?;
        if tip.saturating_sub(candidate_block) >= required_confirmations {
            db::mark_transfer_confirmed(pool, tx_hash).await?;
            info!(tx_hash = %tx_hash, candidate_block, tip, "transfer confirmed");
            return Ok(());
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_gap_math() {
        let candidate_block = 100u64;
        let required = 3u64;
        assert!(103u64.saturating_sub(candidate_block) >= required);
        assert!(!(102u64.saturating_sub(candidate_block) >= required));
    }

    #[test]
    fn test_saturating_sub_never_underflows() {
        assert_eq!(5u64.saturating_sub(10), 0);
    }
}
