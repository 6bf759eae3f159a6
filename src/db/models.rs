#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Note: amount fields are stored as NUMERIC(78,0) in Postgres and read back
// as String to avoid pulling sqlx's bigdecimal feature into every call site —
// math on them happens through `bigdecimal::BigDecimal::parse` at the call
// site that needs it (aml heuristic, reconciler).

/// A per-order deposit wallet, derived from the HD seed at `(user_id, wallet_index)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
    pub derivation_path: String,
    pub wallet_index: i64,
    pub is_testnet: bool,
    pub retired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: i64,
    pub address: String,
    pub derivation_path: String,
    pub wallet_index: i64,
    pub is_testnet: bool,
}

/// A fiat-denominated order awaiting a matching on-chain transfer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub wallet_id: i64,
    pub amount_decimal: String,
    pub status: String,
    pub aml_status: String,
    pub aml_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub wallet_id: i64,
    pub amount_decimal: String,
}

/// Order lifecycle states (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Completed,
    Flagged,
    Cleared,
    Deleted,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Flagged => "flagged",
            OrderStatus::Cleared => "cleared",
            OrderStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An observed on-chain token transfer to a tracked address.
/// The source system calls this table `transactions`; this crate uses
/// `transfers` throughout (see DESIGN.md Open Questions).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub tx_hash: String,
    pub wallet_address: String,
    pub source_address: String,
    pub amount_units: String,
    pub block_number: i64,
    pub confirmed: bool,
    pub processed: bool,
    pub aml_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub tx_hash: String,
    pub wallet_address: String,
    pub source_address: String,
    pub amount_units: String,
    pub block_number: i64,
}

/// The composite AML result for a single transaction (spec.md §3).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AmlVerdict {
    pub id: i64,
    pub tx_hash: String,
    pub wallet_address: String,
    pub source_address: String,
    pub risk_level: String,
    pub risk_source: String,
    pub risk_score: f64,
    pub approved: bool,
    pub requires_review: bool,
    pub notes: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub external_services_used: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewAmlVerdict {
    pub tx_hash: String,
    pub wallet_address: String,
    pub source_address: String,
    pub risk_level: String,
    pub risk_source: String,
    pub risk_score: f64,
    pub approved: bool,
    pub requires_review: bool,
    pub notes: Option<String>,
    pub external_services_used: Vec<String>,
}

/// Risk level classification, ordered low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Classify a [0,1] score per spec.md §4.5: <0.4 low, <0.7 medium, else high.
    pub fn from_score(score: f64) -> Self {
        if score < 0.4 {
            RiskLevel::Low
        } else if score < 0.7 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cached risk info for an address, TTL-governed per spec.md §3.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AddressRisk {
    pub address: String,
    pub risk_level: String,
    pub risk_score: f64,
    pub category: Option<String>,
    pub source: String,
    pub tags: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAddressRisk {
    pub address: String,
    pub risk_level: String,
    pub risk_score: f64,
    pub category: Option<String>,
    pub source: String,
    pub tags: Vec<String>,
}

/// FIFO work order for deferred AML processing (spec.md §3).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PendingCheck {
    pub tx_hash: String,
    pub wallet_address: String,
    pub source_address: String,
    pub amount_units: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct NewPendingCheck {
    pub tx_hash: String,
    pub wallet_address: String,
    pub source_address: String,
    pub amount_units: String,
}

/// Per-chain block-follower cursor.
#[derive(Debug, Clone, FromRow)]
pub struct ChainCursor {
    pub chain_id: i64,
    pub last_processed_block: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.39), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.69), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.7), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::High);
    }

    #[test]
    fn test_order_status_display() {
        assert_eq!(format!("{}", OrderStatus::Pending), "pending");
        assert_eq!(format!("{}", OrderStatus::Completed), "completed");
    }
}
