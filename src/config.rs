#![allow(dead_code)]

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;

/// Main configuration for the deposit ingestion engine.
#[derive(Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub settlement: SettlementConfig,
    pub aml: AmlConfig,
    pub http_port: u16,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("chain", &self.chain)
            .field("wallet", &self.wallet)
            .field("settlement", &self.settlement)
            .field("aml", &self.aml)
            .field("http_port", &self.http_port)
            .finish()
    }
}

/// Database configuration.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("pool_max", &self.pool_max)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Chain client configuration (C1 Chain Client Pool, C4 Block Follower).
#[derive(Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub ws_urls: Vec<String>,
    pub chain_id: u64,
    pub token_contract: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
    #[serde(default)]
    pub blockchain_debug: bool,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    #[serde(default = "default_health_check_period_secs")]
    pub health_check_period_secs: u64,
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_urls", &self.rpc_urls)
            .field("ws_urls", &self.ws_urls)
            .field("chain_id", &self.chain_id)
            .field("token_contract", &self.token_contract)
            .field("token_decimals", &self.token_decimals)
            .field("blockchain_debug", &self.blockchain_debug)
            .field("required_confirmations", &self.required_confirmations)
            .field("health_check_period_secs", &self.health_check_period_secs)
            .finish()
    }
}

/// HD Wallet Vault configuration (C2).
#[derive(Clone, Deserialize)]
pub struct WalletConfig {
    pub seed_mnemonic: String,
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("seed_mnemonic", &"<redacted>")
            .finish()
    }
}

/// Settlement Reconciler / Order Janitor configuration (C7, C9).
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_order_expiration_minutes")]
    pub order_expiration_minutes: i64,
    #[serde(default = "default_order_cleanup_interval_secs")]
    pub order_cleanup_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_confirmation_poll_interval_secs")]
    pub confirmation_poll_interval_secs: u64,
    #[serde(default = "default_confirmation_concurrency")]
    pub confirmation_concurrency: usize,
}

/// AML Evaluator configuration (C5).
#[derive(Clone, Deserialize)]
pub struct AmlConfig {
    #[serde(default)]
    pub chainalysis_api_key: Option<String>,
    #[serde(default)]
    pub chainalysis_url: Option<String>,
    #[serde(default)]
    pub elliptic_api_key: Option<String>,
    #[serde(default)]
    pub elliptic_url: Option<String>,
    #[serde(default)]
    pub amlbot_api_key: Option<String>,
    #[serde(default)]
    pub amlbot_url: Option<String>,
    #[serde(default = "default_transaction_threshold")]
    pub transaction_threshold: String,
    #[serde(default = "default_risk_cache_ttl_secs")]
    pub risk_cache_ttl_secs: u64,
    #[serde(default = "default_pending_check_recheck_interval_secs")]
    pub pending_check_recheck_interval_secs: u64,
}

impl fmt::Debug for AmlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |o: &Option<String>| o.as_ref().map(|_| "<redacted>");
        f.debug_struct("AmlConfig")
            .field("chainalysis_api_key", &redact(&self.chainalysis_api_key))
            .field("chainalysis_url", &self.chainalysis_url)
            .field("elliptic_api_key", &redact(&self.elliptic_api_key))
            .field("elliptic_url", &self.elliptic_url)
            .field("amlbot_api_key", &redact(&self.amlbot_api_key))
            .field("amlbot_url", &self.amlbot_url)
            .field("transaction_threshold", &self.transaction_threshold)
            .field("risk_cache_ttl_secs", &self.risk_cache_ttl_secs)
            .field(
                "pending_check_recheck_interval_secs",
                &self.pending_check_recheck_interval_secs,
            )
            .finish()
    }
}

fn default_pool_max() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_token_decimals() -> u32 {
    18
}

fn default_required_confirmations() -> u64 {
    3
}

fn default_health_check_period_secs() -> u64 {
    30
}

fn default_order_expiration_minutes() -> i64 {
    180
}

fn default_order_cleanup_interval_secs() -> u64 {
    300
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_confirmation_poll_interval_secs() -> u64 {
    30
}

fn default_confirmation_concurrency() -> usize {
    100
}

fn default_transaction_threshold() -> String {
    "5000.0".to_string()
}

fn default_risk_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_pending_check_recheck_interval_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables, loading a `.env` file
    /// first if present.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
            pool_max: env::var("DB_POOL_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_pool_max()),
            connect_timeout_secs: env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_connect_timeout_secs()),
        };

        let rpc_raw = env::var("CHAIN_RPC_URLS")
            .map_err(|_| eyre!("CHAIN_RPC_URLS environment variable is required"))?;
        let rpc_urls = crate::chain::split_endpoint_list(&rpc_raw);
        if rpc_urls.is_empty() {
            return Err(eyre!("CHAIN_RPC_URLS cannot be empty"));
        }

        let ws_raw = env::var("CHAIN_WS_URLS")
            .map_err(|_| eyre!("CHAIN_WS_URLS environment variable is required"))?;
        let ws_urls = crate::chain::split_endpoint_list(&ws_raw);
        if ws_urls.is_empty() {
            return Err(eyre!("CHAIN_WS_URLS cannot be empty"));
        }

        let chain = ChainConfig {
            rpc_urls,
            ws_urls,
            chain_id: env::var("CHAIN_ID")
                .map_err(|_| eyre!("CHAIN_ID environment variable is required"))?
                .parse()
                .wrap_err("CHAIN_ID must be a valid u64")?,
            token_contract: env::var("TOKEN_CONTRACT_ADDRESS")
                .map_err(|_| eyre!("TOKEN_CONTRACT_ADDRESS environment variable is required"))?,
            token_decimals: env::var("TOKEN_DECIMALS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_token_decimals()),
            blockchain_debug: env::var("BLOCKCHAIN_DEBUG_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            required_confirmations: env::var("REQUIRED_CONFIRMATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_required_confirmations()),
            health_check_period_secs: env::var("HEALTH_CHECK_PERIOD_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_health_check_period_secs()),
        };

        let wallet = WalletConfig {
            seed_mnemonic: env::var("WALLET_SEED_MNEMONIC")
                .map_err(|_| eyre!("WALLET_SEED_MNEMONIC environment variable is required"))?,
        };

        let settlement = SettlementConfig {
            order_expiration_minutes: env::var("ORDER_EXPIRATION_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_order_expiration_minutes()),
            order_cleanup_interval_secs: env::var("ORDER_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_order_cleanup_interval_secs()),
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_reconcile_interval_secs()),
            confirmation_poll_interval_secs: env::var("CONFIRMATION_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_confirmation_poll_interval_secs()),
            confirmation_concurrency: env::var("CONFIRMATION_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_confirmation_concurrency()),
        };

        let aml = AmlConfig {
            chainalysis_api_key: env::var("CHAINALYSIS_API_KEY").ok(),
            chainalysis_url: env::var("CHAINALYSIS_URL").ok(),
            elliptic_api_key: env::var("ELLIPTIC_API_KEY").ok(),
            elliptic_url: env::var("ELLIPTIC_URL").ok(),
            amlbot_api_key: env::var("AMLBOT_API_KEY").ok(),
            amlbot_url: env::var("AMLBOT_URL").ok(),
            transaction_threshold: env::var("AML_TRANSACTION_THRESHOLD")
                .unwrap_or_else(|_| default_transaction_threshold()),
            risk_cache_ttl_secs: env::var("AML_RISK_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_risk_cache_ttl_secs()),
            pending_check_recheck_interval_secs: env::var("AML_PENDING_CHECK_RECHECK_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_pending_check_recheck_interval_secs()),
        };

        let http_port = env::var("HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let config = Config {
            database,
            chain,
            wallet,
            settlement,
            aml,
            http_port,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.chain.token_contract.len() != 42 || !self.chain.token_contract.starts_with("0x") {
            return Err(eyre!(
                "chain.token_contract must be a valid hex address (42 chars with 0x prefix)"
            ));
        }

        if self.chain.required_confirmations == 0 {
            return Err(eyre!("chain.required_confirmations must be at least 1"));
        }

        let mnemonic_words: Vec<&str> = self.wallet.seed_mnemonic.split_whitespace().collect();
        if mnemonic_words.len() < 12 {
            return Err(eyre!("wallet.seed_mnemonic must have at least 12 words"));
        }

        if self.settlement.order_expiration_minutes <= 0 {
            return Err(eyre!("settlement.order_expiration_minutes must be positive"));
        }

        if self.settlement.confirmation_concurrency == 0 {
            return Err(eyre!("settlement.confirmation_concurrency must be at least 1"));
        }

        if self.aml.transaction_threshold.parse::<f64>().is_err() {
            return Err(eyre!("aml.transaction_threshold must be a valid number"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_required_confirmations() {
        assert_eq!(default_required_confirmations(), 3);
    }

    #[test]
    fn test_default_order_expiration_minutes() {
        assert_eq!(default_order_expiration_minutes(), 180);
    }

    #[test]
    fn test_default_confirmation_concurrency() {
        assert_eq!(default_confirmation_concurrency(), 100);
    }

    fn sample_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
                pool_max: 10,
                connect_timeout_secs: 5,
            },
            chain: ChainConfig {
                rpc_urls: vec!["http://localhost:8545".to_string()],
                ws_urls: vec!["ws://localhost:8546".to_string()],
                chain_id: 1,
                token_contract: "0x0000000000000000000000000000000000000001".to_string(),
                token_decimals: 18,
                blockchain_debug: false,
                required_confirmations: 3,
                health_check_period_secs: 30,
            },
            wallet: WalletConfig {
                seed_mnemonic: "test test test test test test test test test test test junk"
                    .to_string(),
            },
            settlement: SettlementConfig {
                order_expiration_minutes: 180,
                order_cleanup_interval_secs: 300,
                reconcile_interval_secs: 60,
                confirmation_poll_interval_secs: 30,
                confirmation_concurrency: 100,
            },
            aml: AmlConfig {
                chainalysis_api_key: None,
                chainalysis_url: None,
                elliptic_api_key: None,
                elliptic_url: None,
                amlbot_api_key: None,
                amlbot_url: None,
                transaction_threshold: "5000.0".to_string(),
                risk_cache_ttl_secs: 86400,
                pending_check_recheck_interval_secs: 300,
            },
            http_port: 8080,
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_token_contract() {
        let mut config = sample_config();
        config.chain.token_contract = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_mnemonic() {
        let mut config = sample_config();
        config.wallet.seed_mnemonic = "too short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_confirmations() {
        let mut config = sample_config();
        config.chain.required_confirmations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = sample_config();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("test test test"));
        assert!(debug.contains("<redacted>"));
    }
}
