//! External Interface (C10): collaborator-shape API consumed by the
//! out-of-scope order/UI surface. Plain async methods, no HTTP routing —
//! spec.md §4.10 calls this "collaborator shape only".

use std::str::FromStr;
use std::sync::Arc;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result, WrapErr};
use sqlx::PgPool;

use crate::chain::ChainClientPool;
use crate::db;
use crate::db::models::{NewOrder, Order, Transfer, Wallet};
use crate::registry::AddressRegistry;
use crate::wallet::WalletVault;

/// Wires the HD Wallet Vault, Address Registry, and Chain Client Pool behind
/// the plain operations spec.md §4.10 lists.
pub struct CoreService {
    pool: PgPool,
    wallet_vault: Arc<WalletVault>,
    registry: Arc<AddressRegistry>,
    chain: Arc<ChainClientPool>,
    token_contract: Address,
}

impl CoreService {
    pub fn new(
        pool: PgPool,
        wallet_vault: Arc<WalletVault>,
        registry: Arc<AddressRegistry>,
        chain: Arc<ChainClientPool>,
        token_contract: &str,
    ) -> Result<Self> {
        let token_contract =
            Address::from_str(token_contract).wrap_err("invalid token contract address")?;
        Ok(Self {
            pool,
            wallet_vault,
            registry,
            chain,
            token_contract,
        })
    }

    /// Mint a fresh deposit address for `user_id` and open a pending order
    /// against it for `amount` (human decimal units).
    pub async fn create_order(&self, user_id: i64, amount: &str) -> Result<(i64, String)> {
        BigDecimal::from_str(amount).wrap_err("invalid order amount")?;

        let wallet = self.wallet_vault.mint_for_user(user_id).await?;
        self.registry.register(&wallet.address);

        let order = db::insert_order(
            &self.pool,
            &NewOrder {
                user_id,
                wallet_id: wallet.id,
                amount_decimal: amount.to_string(),
            },
        )
        .await?;

        Ok((order.id, wallet.address))
    }

    pub async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        db::list_orders_for_user(&self.pool, user_id).await
    }

    pub async fn list_wallets(&self, user_id: i64) -> Result<Vec<Wallet>> {
        db::wallets_for_user(&self.pool, user_id).await
    }

    pub async fn list_transfers(&self, wallet_address: &str) -> Result<Vec<Transfer>> {
        db::list_transfers_for_wallet(&self.pool, wallet_address).await
    }

    pub async fn delete_order(&self, order_id: i64) -> Result<()> {
        db::delete_order(&self.pool, order_id).await
    }

    /// On-chain ERC-20 balance of `address` for the configured token.
    pub async fn wallet_balance(&self, address: &str) -> Result<U256> {
        let address = Address::from_str(address).wrap_err("invalid wallet address")?;
        let rpc_url = self
            .chain
            .http_url(0)
            .ok_or_else(|| eyre!("no HTTP endpoint configured"))?;
        let provider =
            ProviderBuilder::new().on_http(rpc_url.parse().wrap_err("invalid RPC url")?);

        let mut call_data = Vec::with_capacity(4 + 32);
        call_data.extend_from_slice(&[0x70, 0xa0, 0x82, 0x31]); // balanceOf(address)
        call_data.extend_from_slice(&[0u8; 12]);
        call_data.extend_from_slice(address.as_slice());

        let tx = TransactionRequest::default()
            .with_to(self.token_contract)
            .with_input(call_data);

        let raw = provider
            .call(&tx)
            .await
            .wrap_err("balanceOf call failed")?;
        if raw.len() < 32 {
            return Err(eyre!("unexpected balanceOf response length"));
        }
        Ok(U256::from_be_slice(&raw[raw.len() - 32..]))
    }

    /// Admin/operator sweep: sign and submit a token transfer from one of
    /// our wallets to an arbitrary destination address.
    pub async fn transfer_funds(
        &self,
        from_wallet_id: i64,
        to_address: &str,
        amount_units: U256,
    ) -> Result<String> {
        let wallet = db::get_wallet(&self.pool, from_wallet_id)
            .await?
            .ok_or_else(|| eyre!("no wallet with id {}", from_wallet_id))?;
        let to_address = Address::from_str(to_address).wrap_err("invalid destination address")?;

        self.wallet_vault
            .sign_token_transfer(&wallet, self.token_contract, to_address, amount_units)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of_selector_is_correct() {
        // keccak256("balanceOf(address)")[0..4]
        assert_eq!([0x70, 0xa0, 0x82, 0x31].len(), 4);
    }

    #[test]
    fn test_invalid_amount_rejected() {
        assert!(BigDecimal::from_str("not-a-number").is_err());
    }
}
