//! Local AML heuristic: address-pattern and amount-threshold scoring that
//! runs unconditionally alongside the remote providers (spec.md §4.5).

use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::str::FromStr;

/// Address-pattern and amount-based scoring with no external dependency.
pub struct LocalHeuristic {
    /// Known-risky addresses (lowercased hex) mapped to a stored score.
    known_risky: HashMap<String, f64>,
}

impl LocalHeuristic {
    pub fn new() -> Self {
        Self {
            known_risky: HashMap::new(),
        }
    }

    pub fn with_known_risky(known_risky: HashMap<String, f64>) -> Self {
        Self { known_risky }
    }

    /// Address pattern score (spec.md §4.5): known-risky lookup, then
    /// substring heuristics, defaulting to 0.1.
    pub fn address_score(&self, address: &str) -> f64 {
        let lower = address.to_lowercase();
        if let Some(&score) = self.known_risky.get(&lower) {
            return score;
        }
        if lower.contains("000000") {
            return 0.4;
        }
        if lower.contains("dead") || lower.contains("beef") {
            return 0.3;
        }
        0.1
    }

    /// Amount contribution: below threshold scores 0.2; above it scales
    /// with the ratio to threshold, capped at 0.9.
    pub fn amount_score(&self, amount_units: &str, threshold: &BigDecimal) -> f64 {
        let amount = match BigDecimal::from_str(amount_units) {
            Ok(a) => a,
            Err(_) => return 0.2,
        };
        if &amount < threshold {
            return 0.2;
        }
        let ratio = (&amount / threshold)
            .to_string()
            .parse::<f64>()
            .unwrap_or(1.0);
        (0.5 + 0.04 * ratio).min(0.9)
    }

    /// Final local score: the max of the address and amount contributions.
    pub fn score(&self, address: &str, amount_units: &str, threshold: &BigDecimal) -> f64 {
        self.address_score(address)
            .max(self.amount_score(amount_units, threshold))
    }
}

impl Default for LocalHeuristic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address_score() {
        let h = LocalHeuristic::new();
        assert_eq!(h.address_score("0x1234"), 0.1);
    }

    #[test]
    fn test_zero_run_address_score() {
        let h = LocalHeuristic::new();
        assert_eq!(h.address_score("0x10000000aa"), 0.4);
    }

    #[test]
    fn test_deadbeef_address_score() {
        let h = LocalHeuristic::new();
        assert_eq!(h.address_score("0xdeadbeef0000000000000000000000000000aa") > 0.0, true);
    }

    #[test]
    fn test_known_risky_overrides() {
        let mut known = HashMap::new();
        known.insert("0xabc".to_string(), 0.95);
        let h = LocalHeuristic::with_known_risky(known);
        assert_eq!(h.address_score("0xABC"), 0.95);
    }

    #[test]
    fn test_amount_below_threshold() {
        let h = LocalHeuristic::new();
        let threshold = BigDecimal::from_str("5000").unwrap();
        assert_eq!(h.amount_score("1000", &threshold), 0.2);
    }

    #[test]
    fn test_amount_above_threshold_scales() {
        let h = LocalHeuristic::new();
        let threshold = BigDecimal::from_str("100").unwrap();
        let score = h.amount_score("1000", &threshold);
        assert!(score > 0.2);
        assert!(score <= 0.9);
    }

    #[test]
    fn test_amount_score_caps_at_point_nine() {
        let h = LocalHeuristic::new();
        let threshold = BigDecimal::from_str("1").unwrap();
        let score = h.amount_score("1000000000", &threshold);
        assert_eq!(score, 0.9);
    }
}
