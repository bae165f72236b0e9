//! Cross-cutting resilience layer: failure counters, circuit breakers and
//! retry/fallback helpers.
//!
//! Unlike the process-wide singleton this pattern is sometimes built as, a
//! [`Resilience`] instance is constructed once at startup and handed to every
//! component that needs it as an ordinary dependency, so tests can build
//! their own disposable instance.

mod circuit_breaker;
mod failure_counter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use failure_counter::{FailureCounter, FailureSnapshot};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error(transparent)]
    Inner(E),
}

/// A warning raised when an operation's failure counter crosses the
/// threshold for the first time since its last success.
#[derive(Debug, Clone)]
pub struct Warning {
    pub operation: String,
    pub count: u32,
    pub message: String,
}

/// Holds one failure counter and one circuit breaker per named operation,
/// plus a broadcast channel that the control API can subscribe to for live
/// warnings.
pub struct Resilience {
    counters: Mutex<HashMap<String, FailureCounter>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    warnings_tx: broadcast::Sender<Warning>,
}

impl Resilience {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Arc<Self> {
        let (warnings_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            counters: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            breaker_config,
            warnings_tx,
        })
    }

    pub fn subscribe_warnings(&self) -> broadcast::Receiver<Warning> {
        self.warnings_tx.subscribe()
    }

    pub async fn record_failure(&self, operation: &str, message: impl Into<String>) {
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry(operation.to_string())
            .or_insert_with(FailureCounter::new);
        if let Some(count) = counter.record_failure() {
            let warning = Warning {
                operation: operation.to_string(),
                count,
                message: message.into(),
            };
            warn!(operation = %warning.operation, count, "failure threshold crossed");
            let _ = self.warnings_tx.send(warning);
        }
    }

    pub async fn record_success(&self, operation: &str) {
        let mut counters = self.counters.lock().await;
        counters
            .entry(operation.to_string())
            .or_insert_with(FailureCounter::new)
            .record_success();
    }

    pub async fn failure_snapshots(&self) -> Vec<FailureSnapshot> {
        self.counters
            .lock()
            .await
            .iter()
            .map(|(name, counter)| counter.snapshot(name))
            .collect()
    }

    pub async fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .lock()
            .await
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    async fn breaker_for(&self, name: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config.clone()))
            .clone()
    }

    /// Run `op` through the named circuit breaker, recording failures and
    /// successes against the matching failure counter.
    pub async fn call<T, E, F, Fut>(
        &self,
        name: &str,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker_for(name).await;
        if !breaker.allow() {
            return Err(ResilienceError::CircuitOpen(name.to_string()));
        }
        match op().await {
            Ok(value) => {
                breaker.on_success();
                self.record_success(name).await;
                Ok(value)
            }
            Err(err) => {
                breaker.on_failure();
                self.record_failure(name, "operation failed").await;
                Err(ResilienceError::Inner(err))
            }
        }
    }

    /// Exponential-backoff retry: waits `base_delay * 2^attempt` between
    /// attempts, recording a failure per attempt.
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        name: &str,
        max_retries: u32,
        base_delay: Duration,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.record_success(name).await;
                    return Ok(value);
                }
                Err(err) => {
                    self.record_failure(name, "retry attempt failed").await;
                    if attempt >= max_retries {
                        return Err(err);
                    }
                    let delay = base_delay * 2u32.pow(attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run `primary`; on failure, record it and run `fallback` instead.
    pub async fn with_fallback<T, E, F, G, FutF, FutG>(
        &self,
        name: &str,
        primary: F,
        fallback: G,
    ) -> Result<T, E>
    where
        F: FnOnce() -> FutF,
        G: FnOnce() -> FutG,
        FutF: Future<Output = Result<T, E>>,
        FutG: Future<Output = Result<T, E>>,
    {
        match primary().await {
            Ok(value) => {
                self.record_success(name).await;
                Ok(value)
            }
            Err(_) => {
                self.record_failure(name, "primary failed, using fallback").await;
                fallback().await
            }
        }
    }
}
