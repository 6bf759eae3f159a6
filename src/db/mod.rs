#![allow(dead_code)]

//! Persistence layer (C8): a transactional store for wallets, orders,
//! transfers, AML verdicts, and the address risk cache.
//!
//! Every write path that spec.md requires to be atomic goes through
//! [`with_tx`]; everything else uses direct pool reads/writes, matching the
//! teacher's db layer (`&PgPool` per call, no repository trait).

use eyre::{Result, WrapErr};
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::error;

pub mod models;

pub use models::*;

/// Create a database connection pool.
pub async fn create_pool(database_url: &str, pool_max: u32, connect_timeout_secs: u64) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(pool_max)
        .acquire_timeout(Duration::from_secs(connect_timeout_secs))
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Run `f` inside a single read-committed transaction, committing on success
/// and rolling back on error or panic unwind. The handful of call sites that
/// require atomicity (AML side-effects, settlement) use this instead of
/// issuing bare pool writes.
pub async fn with_tx<'a, F, T>(pool: &PgPool, f: F) -> Result<T>
where
    F: for<'t> FnOnce(&'t mut Transaction<'a, Postgres>) -> BoxFuture<'t, Result<T>>,
{
    let mut tx = pool.begin().await.wrap_err("Failed to begin transaction")?;
    let result = f(&mut tx).await;
    match result {
        Ok(value) => {
            tx.commit().await.wrap_err("Failed to commit transaction")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Failed to roll back transaction after error");
            }
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------

/// Highest `wallet_index` currently assigned to `user_id`, if any.
pub async fn last_wallet_index(pool: &PgPool, user_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT MAX(wallet_index) FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to read last wallet index")?;

    Ok(row.map(|(idx,)| idx))
}

pub async fn insert_wallet(pool: &PgPool, wallet: &NewWallet) -> Result<Wallet> {
    let row = sqlx::query_as::<_, Wallet>(
        r#"
        INSERT INTO wallets (user_id, address, derivation_path, wallet_index, is_testnet)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, user_id, address, derivation_path, wallet_index, is_testnet, retired_at, created_at
        "#,
    )
    .bind(wallet.user_id)
    .bind(&wallet.address)
    .bind(&wallet.derivation_path)
    .bind(wallet.wallet_index)
    .bind(wallet.is_testnet)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert wallet")?;

    Ok(row)
}

pub async fn get_wallet(pool: &PgPool, wallet_id: i64) -> Result<Option<Wallet>> {
    let row = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
        .bind(wallet_id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to fetch wallet")?;
    Ok(row)
}

pub async fn get_wallet_by_address(pool: &PgPool, address: &str) -> Result<Option<Wallet>> {
    let row = sqlx::query_as::<_, Wallet>(
        "SELECT * FROM wallets WHERE lower(address) = lower($1)",
    )
    .bind(address)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to fetch wallet by address")?;
    Ok(row)
}

pub async fn wallets_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Wallet>> {
    let rows = sqlx::query_as::<_, Wallet>(
        "SELECT * FROM wallets WHERE user_id = $1 ORDER BY wallet_index ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list wallets for user")?;
    Ok(rows)
}

/// All tracked addresses, used to warm the Address Registry at start-up.
pub async fn all_wallet_addresses(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT address FROM wallets")
        .fetch_all(pool)
        .await
        .wrap_err("Failed to list wallet addresses")?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

/// Mark a wallet retired (janitor-driven; the row is kept for audit).
pub async fn retire_wallet(pool: &PgPool, wallet_id: i64) -> Result<()> {
    sqlx::query("UPDATE wallets SET retired_at = now() WHERE id = $1 AND retired_at IS NULL")
        .bind(wallet_id)
        .execute(pool)
        .await
        .wrap_err("Failed to retire wallet")?;
    Ok(())
}

// ---------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------

pub async fn insert_order(pool: &PgPool, order: &NewOrder) -> Result<Order> {
    let row = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (user_id, wallet_id, amount_decimal)
        VALUES ($1, $2, $3::NUMERIC)
        RETURNING id, user_id, wallet_id, amount_decimal::TEXT as amount_decimal,
                  status, aml_status, aml_notes, created_at, updated_at
        "#,
    )
    .bind(order.user_id)
    .bind(order.wallet_id)
    .bind(&order.amount_decimal)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert order")?;

    Ok(row)
}

pub async fn get_order(pool: &PgPool, order_id: i64) -> Result<Option<Order>> {
    let row = sqlx::query_as::<_, Order>(
        "SELECT id, user_id, wallet_id, amount_decimal::TEXT as amount_decimal, status, \
         aml_status, aml_notes, created_at, updated_at FROM orders WHERE id = $1",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to fetch order")?;
    Ok(row)
}

pub async fn list_orders_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Order>> {
    let rows = sqlx::query_as::<_, Order>(
        "SELECT id, user_id, wallet_id, amount_decimal::TEXT as amount_decimal, status, \
         aml_status, aml_notes, created_at, updated_at FROM orders WHERE user_id = $1 ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list orders for user")?;
    Ok(rows)
}

/// Pending orders for a wallet, ordered by id ascending (settlement order,
/// independent of transfer arrival order — spec.md §5).
pub async fn pending_orders_for_wallet(
    pool: &PgPool,
    wallet_id: i64,
) -> Result<Vec<Order>> {
    let rows = sqlx::query_as::<_, Order>(
        "SELECT id, user_id, wallet_id, amount_decimal::TEXT as amount_decimal, status, \
         aml_status, aml_notes, created_at, updated_at FROM orders \
         WHERE wallet_id = $1 AND status = 'pending' ORDER BY id ASC",
    )
    .bind(wallet_id)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list pending orders for wallet")?;
    Ok(rows)
}

/// Complete an order inside an existing transaction (reconciler's atomic step).
pub async fn complete_order_tx(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE orders SET status = 'completed', updated_at = now() WHERE id = $1")
        .bind(order_id)
        .execute(&mut **tx)
        .await
        .wrap_err("Failed to complete order")?;
    Ok(())
}

/// Flag an order's AML status inside an existing transaction (evaluator's
/// atomic side-effect, alongside the transfer flag — spec.md §4.5).
pub async fn flag_order_aml_tx(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    notes: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE orders SET aml_status = 'flagged', aml_notes = $2, updated_at = now() WHERE id = $1",
    )
    .bind(order_id)
    .bind(notes)
    .execute(&mut **tx)
    .await
    .wrap_err("Failed to flag order for AML review")?;
    Ok(())
}

/// Find the pending order (if any) for the wallet owning `wallet_address`,
/// used by the AML evaluator to locate an order to flag.
pub async fn find_pending_order_for_wallet_address(
    pool: &PgPool,
    wallet_address: &str,
) -> Result<Option<Order>> {
    let row = sqlx::query_as::<_, Order>(
        "SELECT o.id, o.user_id, o.wallet_id, o.amount_decimal::TEXT as amount_decimal, \
         o.status, o.aml_status, o.aml_notes, o.created_at, o.updated_at \
         FROM orders o JOIN wallets w ON w.id = o.wallet_id \
         WHERE lower(w.address) = lower($1) AND o.status = 'pending' \
         ORDER BY o.id ASC LIMIT 1",
    )
    .bind(wallet_address)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find pending order for wallet address")?;
    Ok(row)
}

/// Stale pending orders past their expiry window (janitor's reaper query).
pub async fn expired_pending_orders(
    pool: &PgPool,
    expiration_minutes: i64,
) -> Result<Vec<Order>> {
    let rows = sqlx::query_as::<_, Order>(
        "SELECT id, user_id, wallet_id, amount_decimal::TEXT as amount_decimal, status, \
         aml_status, aml_notes, created_at, updated_at FROM orders \
         WHERE status = 'pending' AND created_at < now() - ($1 || ' minutes')::interval",
    )
    .bind(expiration_minutes.to_string())
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list expired pending orders")?;
    Ok(rows)
}

pub async fn delete_order(pool: &PgPool, order_id: i64) -> Result<()> {
    sqlx::query("UPDATE orders SET status = 'deleted', updated_at = now() WHERE id = $1")
        .bind(order_id)
        .execute(pool)
        .await
        .wrap_err("Failed to delete order")?;
    Ok(())
}

// ---------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------

/// Idempotent on conflict: inserting the same `tx_hash` twice is a no-op
/// (spec.md §8 idempotence invariant).
pub async fn insert_transfer(pool: &PgPool, transfer: &NewTransfer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transfers (tx_hash, wallet_address, source_address, amount_units, block_number)
        VALUES ($1, $2, $3, $4::NUMERIC, $5)
        ON CONFLICT (tx_hash) DO NOTHING
        "#,
    )
    .bind(&transfer.tx_hash)
    .bind(&transfer.wallet_address)
    .bind(&transfer.source_address)
    .bind(&transfer.amount_units)
    .bind(transfer.block_number)
    .execute(pool)
    .await
    .wrap_err("Failed to insert transfer")?;
    Ok(())
}

pub async fn get_transfer_by_hash(pool: &PgPool, tx_hash: &str) -> Result<Option<Transfer>> {
    let row = sqlx::query_as::<_, Transfer>(
        "SELECT id, tx_hash, wallet_address, source_address, amount_units::TEXT as amount_units, \
         block_number, confirmed, processed, aml_status, created_at, updated_at \
         FROM transfers WHERE tx_hash = $1",
    )
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to fetch transfer")?;
    Ok(row)
}

/// Flip `confirmed = true` for a transfer. Safe to call more than once
/// (spec.md §4.6 ordering guarantee: a transfer becomes confirmed at most once
/// in effect, since this is a plain idempotent UPDATE).
pub async fn mark_transfer_confirmed(pool: &PgPool, tx_hash: &str) -> Result<()> {
    sqlx::query("UPDATE transfers SET confirmed = true, updated_at = now() WHERE tx_hash = $1")
        .bind(tx_hash)
        .execute(pool)
        .await
        .wrap_err("Failed to mark transfer confirmed")?;
    Ok(())
}

/// All transfers ready for settlement: confirmed and not yet processed
/// (spec.md §4.7 reconciler query).
pub async fn confirmed_unprocessed_transfers(pool: &PgPool) -> Result<Vec<Transfer>> {
    let rows = sqlx::query_as::<_, Transfer>(
        "SELECT id, tx_hash, wallet_address, source_address, amount_units::TEXT as amount_units, \
         block_number, confirmed, processed, aml_status, created_at, updated_at \
         FROM transfers WHERE confirmed = true AND processed = false ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list confirmed unprocessed transfers")?;
    Ok(rows)
}

pub async fn mark_transfer_processed_tx(
    tx: &mut Transaction<'_, Postgres>,
    tx_hash: &str,
) -> Result<()> {
    sqlx::query("UPDATE transfers SET processed = true, updated_at = now() WHERE tx_hash = $1")
        .bind(tx_hash)
        .execute(&mut **tx)
        .await
        .wrap_err("Failed to mark transfer processed")?;
    Ok(())
}

/// Flag a transfer's AML status inside an existing transaction.
pub async fn flag_transfer_aml_tx(
    tx: &mut Transaction<'_, Postgres>,
    tx_hash: &str,
) -> Result<()> {
    sqlx::query("UPDATE transfers SET aml_status = 'flagged', updated_at = now() WHERE tx_hash = $1")
        .bind(tx_hash)
        .execute(&mut **tx)
        .await
        .wrap_err("Failed to flag transfer for AML review")?;
    Ok(())
}

pub async fn list_transfers_for_wallet(pool: &PgPool, wallet_address: &str) -> Result<Vec<Transfer>> {
    let rows = sqlx::query_as::<_, Transfer>(
        "SELECT id, tx_hash, wallet_address, source_address, amount_units::TEXT as amount_units, \
         block_number, confirmed, processed, aml_status, created_at, updated_at \
         FROM transfers WHERE lower(wallet_address) = lower($1) ORDER BY id ASC",
    )
    .bind(wallet_address)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list transfers for wallet")?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// AML verdicts + address risk cache
// ---------------------------------------------------------------------

pub async fn insert_aml_verdict(pool: &PgPool, verdict: &NewAmlVerdict) -> Result<AmlVerdict> {
    let row = sqlx::query_as::<_, AmlVerdict>(
        r#"
        INSERT INTO aml_checks (tx_hash, wallet_address, source_address, risk_level, risk_source,
            risk_score, approved, requires_review, notes, external_services_used)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, tx_hash, wallet_address, source_address, risk_level, risk_source,
                  risk_score, approved, requires_review, notes, checked_at, external_services_used
        "#,
    )
    .bind(&verdict.tx_hash)
    .bind(&verdict.wallet_address)
    .bind(&verdict.source_address)
    .bind(&verdict.risk_level)
    .bind(&verdict.risk_source)
    .bind(verdict.risk_score)
    .bind(verdict.approved)
    .bind(verdict.requires_review)
    .bind(&verdict.notes)
    .bind(&verdict.external_services_used)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert AML verdict")?;
    Ok(row)
}

/// Idempotent on conflict: updates the existing row (spec.md §4.8).
pub async fn upsert_address_risk(pool: &PgPool, risk: &NewAddressRisk) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO address_risk_info (address, risk_level, risk_score, category, source, tags, last_checked)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        ON CONFLICT (address) DO UPDATE SET
            risk_level = EXCLUDED.risk_level,
            risk_score = EXCLUDED.risk_score,
            category = EXCLUDED.category,
            source = EXCLUDED.source,
            tags = EXCLUDED.tags,
            last_checked = now()
        "#,
    )
    .bind(&risk.address)
    .bind(&risk.risk_level)
    .bind(risk.risk_score)
    .bind(&risk.category)
    .bind(&risk.source)
    .bind(&risk.tags)
    .execute(pool)
    .await
    .wrap_err("Failed to upsert address risk")?;
    Ok(())
}

pub async fn get_address_risk(pool: &PgPool, address: &str) -> Result<Option<AddressRisk>> {
    let row = sqlx::query_as::<_, AddressRisk>(
        "SELECT * FROM address_risk_info WHERE lower(address) = lower($1)",
    )
    .bind(address)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to fetch address risk")?;
    Ok(row)
}

// ---------------------------------------------------------------------
// Pending check queue
// ---------------------------------------------------------------------

/// Idempotent on conflict: do nothing (spec.md §4.8).
pub async fn insert_pending_check(pool: &PgPool, check: &NewPendingCheck) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_checks (tx_hash, wallet_address, source_address, amount_units)
        VALUES ($1, $2, $3, $4::NUMERIC)
        ON CONFLICT (tx_hash) DO NOTHING
        "#,
    )
    .bind(&check.tx_hash)
    .bind(&check.wallet_address)
    .bind(&check.source_address)
    .bind(&check.amount_units)
    .execute(pool)
    .await
    .wrap_err("Failed to insert pending check")?;
    Ok(())
}

/// FIFO-by-created_at unprocessed pending checks.
pub async fn unprocessed_pending_checks(pool: &PgPool, limit: i64) -> Result<Vec<PendingCheck>> {
    let rows = sqlx::query_as::<_, PendingCheck>(
        "SELECT tx_hash, wallet_address, source_address, amount_units::TEXT as amount_units, \
         created_at, processed FROM pending_checks WHERE processed = false \
         ORDER BY created_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list unprocessed pending checks")?;
    Ok(rows)
}

pub async fn mark_pending_check_processed(pool: &PgPool, tx_hash: &str) -> Result<()> {
    sqlx::query("UPDATE pending_checks SET processed = true WHERE tx_hash = $1")
        .bind(tx_hash)
        .execute(pool)
        .await
        .wrap_err("Failed to mark pending check processed")?;
    Ok(())
}

// ---------------------------------------------------------------------
// Chain cursor
// ---------------------------------------------------------------------

pub async fn last_processed_block(pool: &PgPool, chain_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_processed_block FROM chain_cursors WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to read chain cursor")?;
    Ok(row.map(|(b,)| b))
}

pub async fn update_last_processed_block(pool: &PgPool, chain_id: i64, block: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chain_cursors (chain_id, last_processed_block, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (chain_id) DO UPDATE SET
            last_processed_block = EXCLUDED.last_processed_block,
            updated_at = now()
        "#,
    )
    .bind(chain_id)
    .bind(block)
    .execute(pool)
    .await
    .wrap_err("Failed to update chain cursor")?;
    Ok(())
}

// ---------------------------------------------------------------------
// Status counters (for the status endpoint / metrics)
// ---------------------------------------------------------------------

pub async fn count_pending_orders(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status = 'pending'")
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count pending orders")?;
    Ok(row.0)
}

pub async fn count_unconfirmed_transfers(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transfers WHERE confirmed = false")
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count unconfirmed transfers")?;
    Ok(row.0)
}

pub async fn count_unsettled_transfers(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM transfers WHERE confirmed = true AND processed = false",
    )
    .fetch_one(pool)
    .await
    .wrap_err("Failed to count unsettled transfers")?;
    Ok(row.0)
}
