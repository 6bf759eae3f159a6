//! Remote AML provider integrations (Chainalysis, Elliptic, AmlBot).
//!
//! Each provider implements [`AmlProvider`]; a provider missing its API key
//! or URL reports itself `enabled() == false` and the evaluator substitutes
//! a disabled placeholder rather than calling out, matching spec.md §4.5.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// A provider's verdict on a single address or transaction.
#[derive(Debug)]
pub struct ProviderVerdict {
    pub risk_score: f64,
    pub category: Option<String>,
    pub source: String,
}

impl ProviderVerdict {
    /// The low-risk placeholder used for a disabled provider.
    pub fn disabled(name: &str) -> Self {
        Self {
            risk_score: 0.0,
            category: None,
            source: format!("{}_disabled", name),
        }
    }
}

#[async_trait]
pub trait AmlProvider: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    async fn check_address(&self, address: &str) -> Result<ProviderVerdict>;

    async fn check_transaction(
        &self,
        tx_hash: &str,
        from: &str,
        to: &str,
        amount_units: &str,
    ) -> Result<ProviderVerdict>;
}

/// Shared HTTP client construction, mirrored from the Terra signer's
/// `Client::builder().timeout(...)` pattern.
fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("reqwest client with a fixed timeout always builds")
}

#[derive(Debug, Deserialize)]
struct GenericRiskResponse {
    #[serde(default)]
    risk_score: Option<f64>,
    #[serde(default)]
    risk: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl GenericRiskResponse {
    fn score(&self) -> f64 {
        if let Some(score) = self.risk_score {
            return score.clamp(0.0, 1.0);
        }
        match self.risk.as_deref() {
            Some("high") => 0.9,
            Some("medium") => 0.5,
            Some("low") => 0.1,
            _ => 0.0,
        }
    }
}

pub struct ChainalysisProvider {
    api_key: Option<String>,
    base_url: Option<String>,
    client: Client,
}

impl ChainalysisProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url,
            client: http_client(),
        }
    }
}

#[async_trait]
impl AmlProvider for ChainalysisProvider {
    fn name(&self) -> &str {
        "chainalysis"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && self.base_url.is_some()
    }

    async fn check_address(&self, address: &str) -> Result<ProviderVerdict> {
        if !self.enabled() {
            return Ok(ProviderVerdict::disabled(self.name()));
        }
        let url = format!(
            "{}/api/risk/v2/addresses/{}",
            self.base_url.as_deref().unwrap_or_default(),
            address
        );
        let response = self
            .client
            .get(&url)
            .header("Token", self.api_key.as_deref().unwrap_or_default())
            .send()
            .await
            .wrap_err("chainalysis address lookup failed")?;
        let body: GenericRiskResponse = response.json().await.unwrap_or(GenericRiskResponse {
            risk_score: None,
            risk: None,
            category: None,
        });
        Ok(ProviderVerdict {
            risk_score: body.score(),
            category: body.category.clone(),
            source: self.name().to_string(),
        })
    }

    async fn check_transaction(
        &self,
        _tx_hash: &str,
        from: &str,
        to: &str,
        _amount_units: &str,
    ) -> Result<ProviderVerdict> {
        if !self.enabled() {
            return Ok(ProviderVerdict::disabled(self.name()));
        }
        let from_risk = self.check_address(from).await?;
        let to_risk = self.check_address(to).await?;
        if from_risk.risk_score >= to_risk.risk_score {
            Ok(from_risk)
        } else {
            Ok(to_risk)
        }
    }
}

pub struct EllipticProvider {
    api_key: Option<String>,
    base_url: Option<String>,
    client: Client,
}

impl EllipticProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url,
            client: http_client(),
        }
    }
}

#[async_trait]
impl AmlProvider for EllipticProvider {
    fn name(&self) -> &str {
        "elliptic"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && self.base_url.is_some()
    }

    async fn check_address(&self, address: &str) -> Result<ProviderVerdict> {
        if !self.enabled() {
            return Ok(ProviderVerdict::disabled(self.name()));
        }
        let url = format!(
            "{}/v2/analyses/synchronous",
            self.base_url.as_deref().unwrap_or_default()
        );
        let response = self
            .client
            .post(&url)
            .header("x-access-key", self.api_key.as_deref().unwrap_or_default())
            .json(&serde_json::json!({ "subject": { "type": "address", "hash": address } }))
            .send()
            .await
            .wrap_err("elliptic address lookup failed")?;
        let body: GenericRiskResponse = response.json().await.unwrap_or(GenericRiskResponse {
            risk_score: None,
            risk: None,
            category: None,
        });
        Ok(ProviderVerdict {
            risk_score: body.score(),
            category: body.category.clone(),
            source: self.name().to_string(),
        })
    }

    async fn check_transaction(
        &self,
        _tx_hash: &str,
        from: &str,
        to: &str,
        _amount_units: &str,
    ) -> Result<ProviderVerdict> {
        if !self.enabled() {
            return Ok(ProviderVerdict::disabled(self.name()));
        }
        let from_risk = self.check_address(from).await?;
        let to_risk = self.check_address(to).await?;
        if from_risk.risk_score >= to_risk.risk_score {
            Ok(from_risk)
        } else {
            Ok(to_risk)
        }
    }
}

pub struct AmlBotProvider {
    api_key: Option<String>,
    base_url: Option<String>,
    client: Client,
}

impl AmlBotProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url,
            client: http_client(),
        }
    }
}

#[async_trait]
impl AmlProvider for AmlBotProvider {
    fn name(&self) -> &str {
        "amlbot"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && self.base_url.is_some()
    }

    async fn check_address(&self, address: &str) -> Result<ProviderVerdict> {
        if !self.enabled() {
            return Ok(ProviderVerdict::disabled(self.name()));
        }
        let url = format!(
            "{}/address/check",
            self.base_url.as_deref().unwrap_or_default()
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.api_key.as_deref().unwrap_or_default())
            .json(&serde_json::json!({ "address": address }))
            .send()
            .await
            .wrap_err("amlbot address lookup failed")?;
        let body: GenericRiskResponse = response.json().await.unwrap_or(GenericRiskResponse {
            risk_score: None,
            risk: None,
            category: None,
        });
        Ok(ProviderVerdict {
            risk_score: body.score(),
            category: body.category.clone(),
            source: self.name().to_string(),
        })
    }

    async fn check_transaction(
        &self,
        tx_hash: &str,
        _from: &str,
        to: &str,
        _amount_units: &str,
    ) -> Result<ProviderVerdict> {
        if !self.enabled() {
            return Ok(ProviderVerdict::disabled(self.name()));
        }
        let _ = tx_hash;
        self.check_address(to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_provider_is_low_risk() {
        let v = ProviderVerdict::disabled("chainalysis");
        assert_eq!(v.risk_score, 0.0);
        assert_eq!(v.source, "chainalysis_disabled");
    }

    #[test]
    fn test_provider_disabled_without_credentials() {
        let p = ChainalysisProvider::new(None, None);
        assert!(!p.enabled());
        let p = EllipticProvider::new(Some("key".to_string()), None);
        assert!(!p.enabled());
    }

    #[test]
    fn test_provider_enabled_with_both_credentials() {
        let p = AmlBotProvider::new(Some("key".to_string()), Some("https://amlbot.example".to_string()));
        assert!(p.enabled());
    }

    #[test]
    fn test_generic_risk_response_score_from_label() {
        let body = GenericRiskResponse {
            risk_score: None,
            risk: Some("high".to_string()),
            category: None,
        };
        assert_eq!(body.score(), 0.9);
    }
}
