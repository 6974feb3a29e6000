//! Cost ledger
//!
//! Process-wide accounting for LLM spend. Every call authorizes against the
//! ceiling before it is issued; rejected calls leave the ledger untouched.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::utils::{ApiError, ApiResult};

/// Fallback price per 1k tokens when the model is not in the table
const DEFAULT_PRICE_PER_1K: f64 = 0.002;

/// Compiled-in price table (USD per 1k tokens), keyed by model-name
/// substring. Pricing drifts; config can override any entry, and the cost
/// guard holds either way.
fn default_pricing() -> HashMap<String, f64> {
    [
        ("gpt-4-turbo", 0.01),
        ("gpt-4", 0.03),
        ("gpt-3.5-turbo", 0.002),
        ("claude-3-opus", 0.015),
        ("claude-3-sonnet", 0.003),
        ("claude-3-haiku", 0.0025),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), *v))
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSnapshot {
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub request_count: i64,
    pub max_cost_usd: f64,
}

#[derive(Debug, Default)]
struct LedgerState {
    total_tokens: i64,
    total_cost_usd: f64,
    request_count: i64,
}

pub struct CostLedger {
    state: Mutex<LedgerState>,
    max_cost_usd: f64,
    pricing: HashMap<String, f64>,
}

impl CostLedger {
    pub fn new(max_cost_usd: f64, overrides: &HashMap<String, f64>) -> Self {
        let mut pricing = default_pricing();
        for (model, price) in overrides {
            pricing.insert(model.clone(), *price);
        }
        Self { state: Mutex::new(LedgerState::default()), max_cost_usd, pricing }
    }

    /// Rough token estimate: one token per four characters
    pub fn estimate_tokens(text: &str) -> i64 {
        (text.len() as i64 + 3) / 4
    }

    /// Longest-substring match against the pricing table
    pub fn price_per_1k(&self, model: &str) -> f64 {
        let model = model.to_lowercase();
        self.pricing
            .iter()
            .filter(|(name, _)| model.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price)
            .unwrap_or(DEFAULT_PRICE_PER_1K)
    }

    pub fn estimate_cost(&self, text: &str, model: &str) -> f64 {
        Self::estimate_tokens(text) as f64 / 1000.0 * self.price_per_1k(model)
    }

    /// Reject when spend already hit the ceiling or the projected total
    /// would pass it. Does not charge.
    pub fn authorize(&self, projected_cost: f64) -> ApiResult<()> {
        let state = self.state.lock().expect("cost ledger lock");
        if state.total_cost_usd >= self.max_cost_usd {
            return Err(ApiError::cost_exceeded(format!(
                "LLM spend ${:.4} reached the ${:.2} ceiling",
                state.total_cost_usd, self.max_cost_usd
            )));
        }
        if state.total_cost_usd + projected_cost > self.max_cost_usd {
            return Err(ApiError::cost_exceeded(format!(
                "projected spend ${:.4} would pass the ${:.2} ceiling",
                state.total_cost_usd + projected_cost,
                self.max_cost_usd
            )));
        }
        Ok(())
    }

    /// Charge actual usage after a successful call
    pub fn record(&self, tokens: i64, cost_usd: f64) {
        let mut state = self.state.lock().expect("cost ledger lock");
        state.total_tokens += tokens.max(0);
        state.total_cost_usd += cost_usd.max(0.0);
        state.request_count += 1;
        tracing::info!(
            "LLM usage - total cost: ${:.4}, requests: {}",
            state.total_cost_usd,
            state.request_count
        );
    }

    pub fn snapshot(&self) -> CostSnapshot {
        let state = self.state.lock().expect("cost ledger lock");
        CostSnapshot {
            total_tokens: state.total_tokens,
            total_cost_usd: state.total_cost_usd,
            request_count: state.request_count,
            max_cost_usd: self.max_cost_usd,
        }
    }

    /// Explicit reset only; the ledger never resets on its own
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("cost ledger lock");
        *state = LedgerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_tokens_by_quarters() {
        assert_eq!(CostLedger::estimate_tokens(""), 0);
        assert_eq!(CostLedger::estimate_tokens("abcd"), 1);
        assert_eq!(CostLedger::estimate_tokens("abcde"), 2);
    }

    #[test]
    fn longest_pricing_match_wins() {
        let ledger = CostLedger::new(10.0, &HashMap::new());
        assert_eq!(ledger.price_per_1k("openai/gpt-4-turbo-2024"), 0.01);
        assert_eq!(ledger.price_per_1k("gpt-4"), 0.03);
        assert_eq!(ledger.price_per_1k("mystery-model"), DEFAULT_PRICE_PER_1K);
    }

    #[test]
    fn config_overrides_defaults() {
        let overrides = [("gpt-4".to_string(), 0.05)].into_iter().collect();
        let ledger = CostLedger::new(10.0, &overrides);
        assert_eq!(ledger.price_per_1k("gpt-4"), 0.05);
    }

    #[test]
    fn rejects_once_ceiling_is_reached() {
        let ledger = CostLedger::new(0.01, &HashMap::new());
        assert!(ledger.authorize(0.001).is_ok());
        ledger.record(10_000, 0.01);
        let err = ledger.authorize(0.0001).unwrap_err();
        assert!(matches!(err, ApiError::CostExceeded(_)));
        // rejected call did not charge
        assert_eq!(ledger.snapshot().request_count, 1);
    }

    #[test]
    fn cost_is_monotonically_non_decreasing() {
        let ledger = CostLedger::new(10.0, &HashMap::new());
        ledger.record(100, 0.001);
        let first = ledger.snapshot().total_cost_usd;
        ledger.record(100, -5.0);
        assert!(ledger.snapshot().total_cost_usd >= first);
    }
}
