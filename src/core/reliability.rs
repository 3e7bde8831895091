// src/core/reliability.rs
//! Bounded retry around outbound exchange calls.
//!
//! A call that exhausts its budget yields [`Emergency`]; callers must not
//! swallow it. The driver loop flattens and halts on receipt.

use crate::error::{Emergency, GatewayError};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call before the call is declared exhausted.
    pub max_retries: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Consecutive failures since the last successful call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorBudget {
    pub consecutive_failures: u32,
    pub max_retries: u32,
}

impl ErrorBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_retries,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns `true` once the budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.max_retries
    }
}

#[derive(Debug)]
pub struct Retrier {
    policy: RetryPolicy,
    budget: ErrorBudget,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            budget: ErrorBudget::new(policy.max_retries),
        }
    }

    pub fn budget(&self) -> ErrorBudget {
        self.budget
    }

    /// Runs `op` until it succeeds or the budget is spent, sleeping `backoff`
    /// after every failed attempt. Each attempt is bounded by `call_timeout`.
    pub async fn call<T, F, Fut>(
        &mut self,
        operation: &'static str,
        mut op: F,
    ) -> Result<T, Emergency>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(&mut op).await {
                Ok(value) => {
                    self.budget.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    let exhausted = self.budget.record_failure();
                    warn!(
                        operation,
                        attempt,
                        consecutive_failures = self.budget.consecutive_failures,
                        max_retries = self.budget.max_retries,
                        error = %e,
                        "outbound call failed"
                    );
                    if exhausted {
                        error!(operation, attempts = attempt, "retry budget exhausted");
                        return Err(Emergency {
                            operation,
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    tokio::time::sleep(self.policy.backoff).await;
                }
            }
        }
    }

    /// Single bounded attempt, used on the flatten path where retrying is not allowed.
    pub async fn once<T, F, Fut>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let result = self.attempt(&mut op).await;
        if let Err(e) = &result {
            error!(operation, error = %e, "flatten call failed");
        }
        result
    }

    async fn attempt<T, F, Fut>(&self, op: &mut F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.policy.call_timeout)),
        }
    }
}
