//! AML Evaluator (C5): aggregates scores from multiple providers plus a
//! local heuristic into a single approve/review/block verdict.

pub mod heuristic;
pub mod providers;

use bigdecimal::BigDecimal;
use eyre::Result;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cache::BoundedTtlCache;
use crate::db;
use crate::db::models::{AmlVerdict, NewAddressRisk, NewAmlVerdict, NewPendingCheck, RiskLevel};
use heuristic::LocalHeuristic;
use providers::{AmlProvider, ProviderVerdict};

const REVIEW_THRESHOLD: f64 = 0.5;
const APPROVAL_THRESHOLD: f64 = 0.7;

/// Number of unprocessed pending checks fetched per sweep tick.
const PENDING_CHECK_BATCH_SIZE: i64 = 50;

/// Composite AML evaluator: fans a transaction out to every enabled
/// provider plus the local heuristic, takes the max score, and (when the
/// verdict isn't clean) flags the transfer and its owning order atomically.
pub struct AmlEvaluator {
    providers: Vec<Box<dyn AmlProvider>>,
    heuristic: LocalHeuristic,
    transaction_threshold: BigDecimal,
    risk_cache: Mutex<BoundedTtlCache<ProviderVerdict>>,
    pool: PgPool,
    pending_check_recheck_interval: Duration,
}

impl Clone for ProviderVerdict {
    fn clone(&self) -> Self {
        Self {
            risk_score: self.risk_score,
            category: self.category.clone(),
            source: self.source.clone(),
        }
    }
}

impl AmlEvaluator {
    pub fn new(
        providers: Vec<Box<dyn AmlProvider>>,
        heuristic: LocalHeuristic,
        transaction_threshold: &str,
        risk_cache_ttl_secs: u64,
        pool: PgPool,
        pending_check_recheck_interval_secs: u64,
    ) -> Result<Self> {
        let transaction_threshold = BigDecimal::from_str(transaction_threshold)
            .map_err(|e| eyre::eyre!("invalid AML transaction threshold: {}", e))?;
        Ok(Self {
            providers,
            heuristic,
            transaction_threshold,
            risk_cache: Mutex::new(BoundedTtlCache::new(risk_cache_ttl_secs)),
            pool,
            pending_check_recheck_interval: Duration::from_secs(pending_check_recheck_interval_secs),
        })
    }

    /// Consult the Address Risk Cache before hitting a remote provider.
    async fn risk_for_address(&self, provider: &dyn AmlProvider, address: &str) -> ProviderVerdict {
        let cache_key = format!("{}:{}", provider.name(), address);
        if let Some(cached) = self.risk_cache.lock().expect("cache mutex poisoned").get(&cache_key) {
            return cached;
        }

        let verdict = match provider.check_address(address).await {
            Ok(v) => v,
            Err(e) => {
                warn!(provider = provider.name(), address, error = %e, "AML provider lookup failed, treating as medium risk");
                ProviderVerdict {
                    risk_score: 0.4,
                    category: None,
                    source: format!("{}_error", provider.name()),
                }
            }
        };

        self.risk_cache
            .lock()
            .expect("cache mutex poisoned")
            .insert(cache_key, verdict.clone());

        if let Err(e) = db::upsert_address_risk(
            &self.pool,
            &NewAddressRisk {
                address: address.to_string(),
                risk_level: RiskLevel::from_score(verdict.risk_score).as_str().to_string(),
                risk_score: verdict.risk_score,
                category: verdict.category.clone(),
                source: verdict.source.clone(),
                tags: Vec::new(),
            },
        )
        .await
        {
            warn!(address, error = %e, "failed to persist address risk cache entry");
        }

        verdict
    }

    /// Score a candidate transfer and, if it isn't clean, flag the transfer
    /// and its owning pending order in one transaction.
    pub async fn evaluate_transaction(
        &self,
        tx_hash: &str,
        wallet_address: &str,
        source_address: &str,
        amount_units: &str,
    ) -> Result<AmlVerdict> {
        let mut best: Option<ProviderVerdict> = None;
        let mut notes_parts = Vec::new();
        let mut services_used = Vec::new();
        let mut any_provider_enabled = false;
        let mut any_provider_reachable = false;

        for provider in &self.providers {
            let verdict = if provider.enabled() {
                any_provider_enabled = true;
                services_used.push(provider.name().to_string());
                match provider
                    .check_transaction(tx_hash, source_address, wallet_address, amount_units)
                    .await
                {
                    Ok(v) => {
                        any_provider_reachable = true;
                        v
                    }
                    Err(e) => {
                        warn!(provider = provider.name(), error = %e, "AML provider transaction check failed");
                        self.risk_for_address(provider.as_ref(), source_address).await
                    }
                }
            } else {
                ProviderVerdict::disabled(provider.name())
            };

            if let Some(category) = &verdict.category {
                notes_parts.push(format!("{}:{}", verdict.source, category));
            }

            best = Some(match best {
                Some(b) if b.risk_score >= verdict.risk_score => b,
                _ => verdict,
            });
        }

        // Every enabled provider was unreachable for this transaction: queue
        // it for a deferred recheck once providers recover, instead of
        // trusting the degraded medium-risk substitute indefinitely.
        if any_provider_enabled && !any_provider_reachable {
            if let Err(e) = db::insert_pending_check(
                &self.pool,
                &NewPendingCheck {
                    tx_hash: tx_hash.to_string(),
                    wallet_address: wallet_address.to_string(),
                    source_address: source_address.to_string(),
                    amount_units: amount_units.to_string(),
                },
            )
            .await
            {
                warn!(tx_hash, error = %e, "failed to queue deferred AML recheck");
            }
        }

        let local_score = self
            .heuristic
            .score(source_address, amount_units, &self.transaction_threshold);
        notes_parts.push(format!("local:{:.2}", local_score));

        let provider_score = best.as_ref().map(|b| b.risk_score).unwrap_or(0.0);
        let score = provider_score.max(local_score);

        let approved = score < APPROVAL_THRESHOLD;
        let requires_review = score >= REVIEW_THRESHOLD;
        let risk_level = RiskLevel::from_score(score);
        let risk_source = best
            .map(|b| b.source)
            .unwrap_or_else(|| "local".to_string());
        let notes = notes_parts.join(", ");

        let verdict = db::insert_aml_verdict(
            &self.pool,
            &NewAmlVerdict {
                tx_hash: tx_hash.to_string(),
                wallet_address: wallet_address.to_string(),
                source_address: source_address.to_string(),
                risk_level: risk_level.as_str().to_string(),
                risk_source,
                risk_score: score,
                approved,
                requires_review,
                notes: Some(notes.clone()),
                external_services_used: services_used,
            },
        )
        .await?;

        if !approved {
            let pending_order_id = db::find_pending_order_for_wallet_address(&self.pool, wallet_address)
                .await?
                .map(|o| o.id);

            let tx_hash_owned = tx_hash.to_string();
            db::with_tx(&self.pool, move |tx| {
                let tx_hash = tx_hash_owned;
                Box::pin(async move {
                    db::flag_transfer_aml_tx(tx, &tx_hash).await?;
                    if let Some(order_id) = pending_order_id {
                        db::flag_order_aml_tx(tx, order_id, &notes).await?;
                    }
                    Ok(())
                })
            })
            .await?;
        }

        Ok(verdict)
    }

    /// Run the deferred-recheck sweep forever, ticking at
    /// `self.pending_check_recheck_interval`.
    pub async fn run_pending_check_sweep(&self) {
        loop {
            if let Err(e) = self.sweep_pending_checks().await {
                error!(error = %e, "pending AML check sweep failed");
            }
            tokio::time::sleep(self.pending_check_recheck_interval).await;
        }
    }

    /// One sweep pass: for every unprocessed pending check, retry the
    /// enabled providers against its source address. Once at least one
    /// provider responds (or none remain enabled), the check is cleared —
    /// the transaction's verdict itself was already recorded synchronously
    /// with the medium-risk fallback score, this only stops the re-querying.
    async fn sweep_pending_checks(&self) -> Result<()> {
        let checks = db::unprocessed_pending_checks(&self.pool, PENDING_CHECK_BATCH_SIZE).await?;
        for check in checks {
            let enabled_providers: Vec<&Box<dyn AmlProvider>> =
                self.providers.iter().filter(|p| p.enabled()).collect();

            let mut any_reachable = enabled_providers.is_empty();
            for provider in enabled_providers {
                if provider.check_address(&check.source_address).await.is_ok() {
                    any_reachable = true;
                    break;
                }
            }

            if any_reachable {
                db::mark_pending_check_processed(&self.pool, &check.tx_hash).await?;
                info!(tx_hash = %check.tx_hash, "deferred AML recheck cleared, provider(s) reachable again");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(REVIEW_THRESHOLD, 0.5);
        assert_eq!(APPROVAL_THRESHOLD, 0.7);
    }

    #[test]
    fn test_provider_error_fallback_is_medium_risk() {
        let fallback = ProviderVerdict {
            risk_score: 0.4,
            category: None,
            source: "chainalysis_error".to_string(),
        };
        assert!((0.4..=0.5).contains(&fallback.risk_score));
    }
}
