//! Settlement Reconciler (C7): matches confirmed, unprocessed transfers
//! against pending orders on the same wallet and settles them greedily.
//!
//! Runs on a fixed cadence (`settlement.reconcile_interval_secs`), grounded
//! in the operator's periodic-poll loops for pending bridge state.

use std::time::Duration;

use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::db;
use crate::db::models::Transfer;

/// Matches confirmed transfers to pending orders and settles them.
pub struct SettlementReconciler {
    pool: PgPool,
    token_decimals: u32,
    interval: Duration,
}

impl SettlementReconciler {
    pub fn new(pool: PgPool, token_decimals: u32, interval_secs: u64) -> Self {
        Self {
            pool,
            token_decimals,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run the reconciliation loop forever, ticking at `self.interval`.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.reconcile_once().await {
                error!(error = %e, "settlement reconciliation pass failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One reconciliation pass: every confirmed, unprocessed transfer is
    /// matched against its wallet's pending orders, oldest order first.
    pub async fn reconcile_once(&self) -> Result<()> {
        let transfers = db::confirmed_unprocessed_transfers(&self.pool).await?;
        for transfer in transfers {
            if let Err(e) = self.settle_transfer(&transfer).await {
                warn!(tx_hash = %transfer.tx_hash, error = %e, "failed to settle transfer");
            }
        }
        Ok(())
    }

    /// Settle a single transfer: greedily apply its amount to the wallet's
    /// pending orders in ascending id order, completing every order it fully
    /// covers, and drop any leftover remainder (spec.md §4.7).
    async fn settle_transfer(&self, transfer: &Transfer) -> Result<()> {
        let wallet = db::get_wallet_by_address(&self.pool, &transfer.wallet_address)
            .await?
            .ok_or_else(|| eyre::eyre!("no wallet found for transfer address"))?;

        let pending = db::pending_orders_for_wallet(&self.pool, wallet.id).await?;

        let scale = units_scale(self.token_decimals);
        let mut remaining_units = parse_units(&transfer.amount_units)?;
        let mut covered_order_ids = Vec::new();

        for order in &pending {
            if remaining_units <= BigDecimal::from(0) {
                break;
            }
            let order_units = parse_decimal(&order.amount_decimal)? * &scale;
            if remaining_units >= order_units {
                remaining_units -= order_units;
                covered_order_ids.push(order.id);
            } else {
                break;
            }
        }

        if covered_order_ids.is_empty() {
            info!(
                tx_hash = %transfer.tx_hash,
                wallet_id = wallet.id,
                "confirmed transfer covers no pending order in full; marking processed with no orders completed"
            );
        }

        let tx_hash = transfer.tx_hash.clone();
        db::with_tx(&self.pool, move |tx| {
            let tx_hash = tx_hash.clone();
            let order_ids = covered_order_ids.clone();
            Box::pin(async move {
                for order_id in order_ids {
                    db::complete_order_tx(tx, order_id).await?;
                }
                db::mark_transfer_processed_tx(tx, &tx_hash).await?;
                Ok(())
            })
        })
        .await
        .wrap_err("Failed to commit settlement transaction")?;

        info!(tx_hash = %transfer.tx_hash, wallet_id = wallet.id, "transfer settled");
        Ok(())
    }
}

/// 10^decimals as a `BigDecimal`, for converting order amounts (human
/// decimal units) into on-chain smallest units.
fn units_scale(decimals: u32) -> BigDecimal {
    let raw = format!("1{}", "0".repeat(decimals as usize));
    raw.parse::<BigDecimal>().expect("power-of-ten literal always parses")
}

fn parse_units(raw: &str) -> Result<BigDecimal> {
    raw.parse::<BigDecimal>()
        .wrap_err_with(|| format!("invalid transfer amount_units: {}", raw))
}

fn parse_decimal(raw: &str) -> Result<BigDecimal> {
    raw.parse::<BigDecimal>()
        .wrap_err_with(|| format!("invalid order amount_decimal: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_units_scale_18_decimals() {
        let scale = units_scale(18);
        assert_eq!(scale, BigDecimal::from_str("1000000000000000000").unwrap());
    }

    #[test]
    fn test_greedy_matching_covers_smaller_orders_first() {
        let scale = units_scale(6);
        let transfer_units = BigDecimal::from_str("1500000").unwrap(); // 1.5 tokens
        let order_a = BigDecimal::from_str("1").unwrap() * &scale; // 1.0
        let order_b = BigDecimal::from_str("1").unwrap() * &scale; // 1.0

        let mut remaining = transfer_units;
        let mut covered = 0;
        for order_units in [order_a, order_b] {
            if remaining >= order_units {
                remaining -= order_units;
                covered += 1;
            } else {
                break;
            }
        }
        assert_eq!(covered, 1);
        assert_eq!(remaining, BigDecimal::from_str("500000").unwrap());
    }

    #[test]
    fn test_leftover_remainder_is_dropped_not_errored() {
        let remaining = BigDecimal::from_str("250000").unwrap();
        assert!(remaining > BigDecimal::from(0));
    }
}
