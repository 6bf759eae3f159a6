//! HD Wallet Vault (C2): seed-backed deterministic key derivation, per-user
//! indexed address minting, and transaction signing for outbound sweeps.
//!
//! Derivation follows `m/44'/<coin>'/<user>'/0/<index>`, grounded in the
//! sibling Terra signer's bip39/bip32 derivation
//! (`multichain-rs::terra::signer::TerraSigner::new`) and adapted to EVM via
//! `alloy_signer_local::MnemonicBuilder`.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy_signer_local::coins_bip39::English;
use alloy_signer_local::MnemonicBuilder;
use eyre::{eyre, Result, WrapErr};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::chain::ChainClientPool;
use crate::db;
use crate::db::models::{NewWallet, Wallet};

/// Default BIP-44 coin type for EVM-compatible chains.
pub const DEFAULT_COIN_TYPE: u32 = 60;

/// ERC-20 `transfer(address,uint256)` selector.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Build the derivation path for `(user_id, wallet_index)` per the template
/// `m/44'/<coin>'/<user>'/0/<index>`.
pub fn format_derivation_path(coin_type: u32, user_id: i64, wallet_index: i64) -> String {
    format!("m/44'/{}'/{}'/0/{}", coin_type, user_id, wallet_index)
}

/// Inverse of [`format_derivation_path`], ignoring the coin type segment.
pub fn parse_derivation_path(path: &str) -> Result<(i64, i64)> {
    let segments: Vec<&str> = path.trim_start_matches("m/").split('/').collect();
    if segments.len() != 5 {
        return Err(eyre!("malformed derivation path: {}", path));
    }
    let user_id: i64 = segments[2]
        .trim_end_matches('\'')
        .parse()
        .wrap_err_with(|| format!("malformed user segment in path: {}", path))?;
    let wallet_index: i64 = segments[4]
        .parse()
        .wrap_err_with(|| format!("malformed index segment in path: {}", path))?;
    Ok((user_id, wallet_index))
}

/// Next wallet index for a user: the first mint starts at 1 so successful
/// mints form `{1, 2, …, k}` with no gaps (spec.md §8).
fn next_wallet_index(last_index: Option<i64>) -> i64 {
    last_index.map(|i| i + 1).unwrap_or(1)
}

/// Derive the address for `(user_id, wallet_index)` without touching the DB.
fn derive_address(mnemonic: &str, coin_type: u32, user_id: i64, wallet_index: i64) -> Result<Address> {
    let path = format_derivation_path(coin_type, user_id, wallet_index);
    let signer = MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .derivation_path(&path)
        .wrap_err("invalid derivation path")?
        .build()
        .wrap_err("failed to derive signer from mnemonic")?;
    Ok(signer.address())
}

/// HD Wallet Vault: mints per-order deposit addresses and signs outbound
/// sweeps against the same seed.
pub struct WalletVault {
    mnemonic: String,
    coin_type: u32,
    chain_id: u64,
    is_testnet: bool,
    pool: PgPool,
    chain: Arc<ChainClientPool>,
    /// Per-user mint locks, preventing concurrent `mint_for_user` calls on
    /// the same user from colliding on `last_wallet_index`.
    mint_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl WalletVault {
    pub fn new(
        mnemonic: String,
        chain_id: u64,
        is_testnet: bool,
        pool: PgPool,
        chain: Arc<ChainClientPool>,
    ) -> Self {
        Self {
            mnemonic,
            coin_type: DEFAULT_COIN_TYPE,
            chain_id,
            is_testnet,
            pool,
            chain,
            mint_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for_user(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.mint_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Mint the next deposit address for `user_id`: read the last used
    /// index, derive at `index + 1`, persist, return.
    pub async fn mint_for_user(&self, user_id: i64) -> Result<Wallet> {
        let user_lock = self.lock_for_user(user_id).await;
        let _guard = user_lock.lock().await;

        let last_index = db::last_wallet_index(&self.pool, user_id).await?;
        let next_index = next_wallet_index(last_index);

        let address = derive_address(&self.mnemonic, self.coin_type, user_id, next_index)?;
        let derivation_path = format_derivation_path(self.coin_type, user_id, next_index);

        let wallet = db::insert_wallet(
            &self.pool,
            &NewWallet {
                user_id,
                address: format!("{:#x}", address),
                derivation_path,
                wallet_index: next_index,
                is_testnet: self.is_testnet,
            },
        )
        .await?;

        info!(wallet_id = wallet.id, user_id, index = next_index, "minted deposit wallet");
        Ok(wallet)
    }

    /// Re-derive `wallet`'s address from the seed and confirm it matches the
    /// stored address. A mismatch is a hard error per spec.md §5: signing
    /// must never proceed against an address the seed cannot reproduce.
    fn verify_wallet(&self, wallet: &Wallet) -> Result<Address> {
        let (user_id, wallet_index) = parse_derivation_path(&wallet.derivation_path)?;
        let derived = derive_address(&self.mnemonic, self.coin_type, user_id, wallet_index)?;
        let stored: Address = wallet
            .address
            .parse()
            .wrap_err_with(|| format!("stored address is not valid hex: {}", wallet.address))?;

        if derived != stored {
            error!(
                wallet_id = wallet.id,
                derived = %derived,
                stored = %stored,
                "derivation mismatch: re-derived address does not match stored address"
            );
            return Err(eyre!(
                "derivation mismatch for wallet {}: derived {} != stored {}",
                wallet.id,
                derived,
                stored
            ));
        }

        Ok(derived)
    }

    fn signer_for(&self, wallet: &Wallet) -> Result<alloy_signer_local::PrivateKeySigner> {
        self.verify_wallet(wallet)?;
        MnemonicBuilder::<English>::default()
            .phrase(&self.mnemonic)
            .derivation_path(&wallet.derivation_path)
            .wrap_err("invalid derivation path")?
            .build()
            .wrap_err("failed to derive signer from mnemonic")
    }

    /// Sign and submit an ERC-20 `transfer(address,uint256)` call from
    /// `wallet` to `to_address`, gas-limit estimated then inflated 20%.
    pub async fn sign_token_transfer(
        &self,
        wallet: &Wallet,
        token_contract: Address,
        to_address: Address,
        amount_units: U256,
    ) -> Result<String> {
        let signer = self.signer_for(wallet)?;
        let ethereum_wallet = EthereumWallet::from(signer);

        let rpc_url = self
            .chain
            .http_url(0)
            .ok_or_else(|| eyre!("no HTTP endpoint configured"))?;

        let provider = ProviderBuilder::new()
            .wallet(ethereum_wallet)
            .on_http(rpc_url.parse().wrap_err("invalid RPC url")?);

        let mut call_data = Vec::with_capacity(4 + 32 + 32);
        call_data.extend_from_slice(&TRANSFER_SELECTOR);
        call_data.extend_from_slice(&[0u8; 12]);
        call_data.extend_from_slice(to_address.as_slice());
        call_data.extend_from_slice(&amount_units.to_be_bytes::<32>());

        let base_tx = TransactionRequest::default()
            .with_to(token_contract)
            .with_input(call_data.clone())
            .with_chain_id(self.chain_id);

        let estimated_gas = provider
            .estimate_gas(&base_tx)
            .await
            .wrap_err("failed to estimate gas for token transfer")?;
        let inflated_gas = estimated_gas + (estimated_gas * 20 / 100);

        let tx = base_tx.with_gas_limit(inflated_gas);

        let pending = provider
            .send_transaction(tx)
            .await
            .wrap_err("failed to submit token transfer")?;

        Ok(format!("{:#x}", *pending.tx_hash()))
    }

    /// Sweep the wallet's native-currency balance to `destination`, leaving
    /// enough behind to cover gas at 21000 units.
    pub async fn sweep_native(&self, wallet: &Wallet, destination: Address) -> Result<String> {
        let signer = self.signer_for(wallet)?;
        let from_address = signer.address();
        let ethereum_wallet = EthereumWallet::from(signer);

        let rpc_url = self
            .chain
            .http_url(0)
            .ok_or_else(|| eyre!("no HTTP endpoint configured"))?;

        let provider = ProviderBuilder::new()
            .wallet(ethereum_wallet)
            .on_http(rpc_url.parse().wrap_err("invalid RPC url")?);

        let balance = provider.get_balance(from_address).await?;
        let gas_price = provider.get_gas_price().await?;
        let gas_cost = U256::from(gas_price) * U256::from(21_000u64);

        if balance <= gas_cost {
            return Err(eyre!(
                "wallet {} balance {} insufficient to cover gas cost {}",
                wallet.id,
                balance,
                gas_cost
            ));
        }

        let sweep_amount = balance - gas_cost;

        let tx = TransactionRequest::default()
            .with_to(destination)
            .with_value(sweep_amount)
            .with_chain_id(self.chain_id);

        let pending = provider
            .send_transaction(tx)
            .await
            .wrap_err("failed to submit native sweep")?;

        Ok(format!("{:#x}", *pending.tx_hash()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "test test test test test test test test test test test junk";

    #[test]
    fn test_format_derivation_path() {
        assert_eq!(
            format_derivation_path(60, 7, 2),
            "m/44'/60'/7'/0/2"
        );
    }

    #[test]
    fn test_parse_derivation_path_roundtrip() {
        let path = format_derivation_path(60, 42, 9);
        let (user, index) = parse_derivation_path(&path).unwrap();
        assert_eq!(user, 42);
        assert_eq!(index, 9);
    }

    #[test]
    fn test_parse_derivation_path_rejects_malformed() {
        assert!(parse_derivation_path("not/a/path").is_err());
    }

    #[test]
    fn test_derive_address_is_stable() {
        let a1 = derive_address(TEST_MNEMONIC, 60, 1, 0).unwrap();
        let a2 = derive_address(TEST_MNEMONIC, 60, 1, 0).unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_derive_address_varies_by_index() {
        let a1 = derive_address(TEST_MNEMONIC, 60, 1, 0).unwrap();
        let a2 = derive_address(TEST_MNEMONIC, 60, 1, 1).unwrap();
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_derive_address_varies_by_user() {
        let a1 = derive_address(TEST_MNEMONIC, 60, 1, 0).unwrap();
        let a2 = derive_address(TEST_MNEMONIC, 60, 2, 0).unwrap();
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_next_wallet_index_first_mint_starts_at_one() {
        assert_eq!(next_wallet_index(None), 1);
    }

    #[test]
    fn test_next_wallet_index_forms_no_gaps() {
        let mut last = None;
        let minted: Vec<i64> = (0..4)
            .map(|_| {
                let next = next_wallet_index(last);
                last = Some(next);
                next
            })
            .collect();
        assert_eq!(minted, vec![1, 2, 3, 4]);
    }
}
