//! Address Registry (C3): a lock-free, read-mostly set of tracked deposit
//! addresses, warmed from the database at start-up.
//!
//! Grounded in `dashmap` usage elsewhere in the retrieval pack for
//! concurrent read-heavy EVM address bookkeeping; `DashSet` gives the Block
//! Follower non-blocking membership checks on the hot path.

use dashmap::DashSet;
use eyre::Result;
use sqlx::PgPool;
use tracing::info;

use crate::db;

/// Canonicalize an address to lowercase hex for set membership.
fn canonicalize(address: &str) -> String {
    address.to_lowercase()
}

/// Tracked-address set backing the Block Follower's "is this transfer aimed
/// at one of ours" check.
pub struct AddressRegistry {
    addresses: DashSet<String>,
    pool: PgPool,
}

impl AddressRegistry {
    /// Build an empty registry and warm it from the `wallets` table.
    pub async fn warm(pool: PgPool) -> Result<Self> {
        let addresses = db::all_wallet_addresses(&pool).await?;
        let set = DashSet::with_capacity(addresses.len());
        for address in &addresses {
            set.insert(canonicalize(address));
        }
        info!(count = set.len(), "address registry warmed from database");
        Ok(Self {
            addresses: set,
            pool,
        })
    }

    /// True if `address` is a currently-tracked deposit address.
    pub fn is_tracked(&self, address: &str) -> bool {
        self.addresses.contains(&canonicalize(address))
    }

    /// Register a newly minted address: writes the DB row (via the caller,
    /// which already holds the `Wallet` row) then inserts into the in-memory
    /// set. Call this right after [`crate::wallet::WalletVault::mint_for_user`]
    /// persists the wallet.
    pub fn register(&self, address: &str) {
        self.addresses.insert(canonicalize(address));
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_lowercases() {
        assert_eq!(
            canonicalize("0xABCDEF0000000000000000000000000000000000"),
            "0xabcdef0000000000000000000000000000000000"
        );
    }
}
