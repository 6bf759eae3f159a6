//! Order Janitor (C9): periodically reaps pending orders that outlived
//! `settlement.order_expiration_minutes` and retires their wallet so it
//! stops being offered for new deposits.

use std::time::Duration;

use eyre::Result;
use sqlx::PgPool;
use tracing::{error, info};

use crate::db;

/// Sweeps expired pending orders on a fixed cadence.
pub struct OrderJanitor {
    pool: PgPool,
    expiration_minutes: i64,
    interval: Duration,
}

impl OrderJanitor {
    pub fn new(pool: PgPool, expiration_minutes: i64, cleanup_interval_secs: u64) -> Self {
        Self {
            pool,
            expiration_minutes,
            interval: Duration::from_secs(cleanup_interval_secs),
        }
    }

    /// Run the reap loop forever, ticking at `self.interval`.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.reap_once().await {
                error!(error = %e, "order janitor pass failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One reap pass: every pending order older than the expiration window
    /// is marked deleted and its wallet is retired (not deleted, so the
    /// historical address stays tracked for any late-arriving deposit).
    pub async fn reap_once(&self) -> Result<()> {
        let expired = db::expired_pending_orders(&self.pool, self.expiration_minutes).await?;
        for order in &expired {
            db::delete_order(&self.pool, order.id).await?;
            db::retire_wallet(&self.pool, order.wallet_id).await?;
            info!(order_id = order.id, wallet_id = order.wallet_id, "expired order reaped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_interval_is_respected_as_seconds() {
        let interval = std::time::Duration::from_secs(300);
        assert_eq!(interval.as_secs(), 300);
    }
}
