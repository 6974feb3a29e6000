//! LLM Gateway
//!
//! The single point of contact with the LLM provider. Everything the rest
//! of the system needs funnels through two calls:
//!
//! - `call_text` - prompt in, raw text out
//! - `call_json` - prompt in, repaired-and-parsed JSON object out
//!
//! The gateway owns the provider credentials, the retry policy, the
//! in-flight semaphore, and the cost ledger. Nothing else performs
//! outbound LLM I/O.

mod client;
pub mod cost;
pub mod json_repair;
pub mod prompts;

pub use client::{ChatOutcome, LlmClient};
pub use cost::{CostLedger, CostSnapshot};
pub use json_repair::parse_json_object;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{LlmConfig, RetryConfig};
use crate::utils::{ApiError, ApiResult};

pub struct LlmGateway {
    client: LlmClient,
    ledger: Arc<CostLedger>,
    /// Bounds in-flight provider calls; callers block when full
    semaphore: Semaphore,
    retry: RetryConfig,
    enabled: bool,
}

impl LlmGateway {
    pub fn new(config: &LlmConfig, retry: RetryConfig, ledger: Arc<CostLedger>) -> ApiResult<Self> {
        let client = LlmClient::new(config)?;
        Ok(Self {
            semaphore: Semaphore::new(config.max_concurrent_requests.max(1)),
            enabled: config.enabled && client.is_configured(),
            client,
            ledger,
            retry,
        })
    }

    pub fn is_available(&self) -> bool {
        self.enabled
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Raw text call with pre-flight cost check and retry
    pub async fn call_text(&self, prompt: &str, system: Option<&str>) -> ApiResult<String> {
        let outcome = self.call_with_retry(prompt, system, |content| Ok(content)).await?;
        Ok(outcome)
    }

    /// JSON object call; malformed responses are repaired, and responses
    /// that stay unparseable count as failed attempts.
    pub async fn call_json(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> ApiResult<serde_json::Map<String, serde_json::Value>> {
        self.call_with_retry(prompt, system, |content| parse_json_object(&content)).await
    }

    async fn call_with_retry<T, F>(
        &self,
        prompt: &str,
        system: Option<&str>,
        validate: F,
    ) -> ApiResult<T>
    where
        F: Fn(String) -> ApiResult<T>,
    {
        if !self.enabled {
            return Err(ApiError::llm_unavailable("LLM enrichment is disabled"));
        }

        // Pre-flight: estimate and authorize before any traffic. A
        // rejection must not charge the ledger.
        let estimate_basis = match system {
            Some(system) => format!("{}{}", system, prompt),
            None => prompt.to_string(),
        };
        let estimated_tokens = CostLedger::estimate_tokens(&estimate_basis);
        let estimated_cost = self.ledger.estimate_cost(&estimate_basis, self.client.model());
        self.ledger.authorize(estimated_cost)?;
        tracing::debug!("Estimated LLM cost: ${:.4}", estimated_cost);

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ApiError::internal_error("LLM semaphore closed"))?;

        let mut wait = Duration::from_millis(self.retry.initial_wait_ms);
        let max_wait = Duration::from_millis(self.retry.max_wait_ms);
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            // No attempt is issued once spend has hit the ceiling
            self.ledger.authorize(estimated_cost)?;

            match self.client.chat_completion(prompt, system).await {
                Ok(outcome) => {
                    // The provider answered; charge actual usage (or the
                    // estimate) even if the payload turns out unusable
                    let (tokens, cost) = match outcome.usage {
                        Some((prompt_tokens, completion_tokens)) => {
                            let total = prompt_tokens + completion_tokens;
                            let cost = total as f64 / 1000.0
                                * self.ledger.price_per_1k(self.client.model());
                            (total, cost)
                        }
                        None => (estimated_tokens, estimated_cost),
                    };
                    self.ledger.record(tokens, cost);

                    match validate(outcome.content) {
                        Ok(value) => return Ok(value),
                        Err(e) => {
                            tracing::warn!(
                                "LLM attempt {} returned unusable output: {}",
                                attempt,
                                e
                            );
                            last_error = e.to_string();
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("LLM attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(wait).await;
                wait = (wait * 2).min(max_wait);
            }
        }

        Err(ApiError::llm_unavailable(format!(
            "retries exhausted after {} attempts: {}",
            self.retry.max_attempts, last_error
        )))
    }
}
