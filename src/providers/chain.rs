//! # Provider Fallback Chain
//!
//! Runs one capability (transcription, translation or speech synthesis)
//! against an ordered list of providers:
//!
//! 1. Try the first provider, racing it against the chain's timeout
//! 2. On error or timeout, log and move on to the next provider
//! 3. Return the first success
//! 4. If the last provider also fails, report `ServiceUnavailable`
//!
//! Each provider is attempted at most once per invocation.
//!
//! ## Metrics:
//! The chain keeps per-provider counters (attempts, failures, timeouts,
//! latency) so the metrics endpoint can show which backends are struggling.

use super::{Capability, Provider};
use crate::error::{ProviderError, RelayError};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Outcome of one provider attempt.
#[derive(Debug, Clone)]
pub enum ProviderResult<T> {
    Success {
        provider: String,
        latency: Duration,
        value: T,
    },
    Failure {
        provider: String,
        latency: Duration,
        error: ProviderError,
    },
}

impl<T> ProviderResult<T> {
    pub fn latency(&self) -> Duration {
        match self {
            ProviderResult::Success { latency, .. } | ProviderResult::Failure { latency, .. } => *latency,
        }
    }
}

/// Running counters for one provider inside one chain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderMetrics {
    pub capability: String,
    pub provider: String,
    pub attempts: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub total_latency_ms: u64,
}

impl ProviderMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            (self.attempts - self.failures) as f64 / self.attempts as f64
        }
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.attempts as f64
        }
    }

    fn record<T>(&mut self, result: &ProviderResult<T>) {
        self.attempts += 1;
        self.total_latency_ms += result.latency().as_millis() as u64;
        if let ProviderResult::Failure { error, .. } = result {
            self.failures += 1;
            if matches!(error, ProviderError::Timeout(_)) {
                self.timeouts += 1;
            }
        }
    }
}

/// Ordered list of interchangeable providers for one capability.
pub struct ProviderChain<P: ?Sized> {
    capability: Capability,
    providers: Vec<Arc<P>>,
    timeout: Duration,
    /// Indexed like `providers`
    metrics: Mutex<Vec<ProviderMetrics>>,
}

impl<P: ?Sized + Provider> ProviderChain<P> {
    pub fn new(capability: Capability, providers: Vec<Arc<P>>, timeout: Duration) -> Self {
        let metrics = providers
            .iter()
            .map(|p| ProviderMetrics {
                capability: capability.to_string(),
                provider: p.name().to_string(),
                ..Default::default()
            })
            .collect();

        Self {
            capability,
            providers,
            timeout,
            metrics: Mutex::new(metrics),
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// True when the only provider left is the deterministic stub.
    pub fn is_mock_only(&self) -> bool {
        !self.providers.is_empty()
            && self.providers.iter().all(|p| p.name() == super::mock::MOCK_PROVIDER_NAME)
    }

    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Run `attempt` against each provider in order until one succeeds.
    ///
    /// `attempt` builds the call for a given provider; the chain adds the
    /// timeout, the logging and the metrics around it.
    pub async fn invoke<'a, T, F>(&'a self, mut attempt: F) -> Result<T, RelayError>
    where
        F: FnMut(&'a P) -> BoxFuture<'a, Result<T, ProviderError>>,
    {
        let mut last_error: Option<ProviderError> = None;

        for (index, provider) in self.providers.iter().enumerate() {
            let result = self.attempt_one(provider.as_ref(), &mut attempt).await;

            {
                let mut metrics = self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(entry) = metrics.get_mut(index) {
                    entry.record(&result);
                }
            }

            match result {
                ProviderResult::Success { provider, latency, value } => {
                    debug!(
                        capability = %self.capability,
                        provider = %provider,
                        latency_ms = latency.as_millis() as u64,
                        "Provider succeeded"
                    );
                    return Ok(value);
                }
                ProviderResult::Failure { provider, latency, error } => {
                    let is_last = index + 1 == self.providers.len();
                    if is_last {
                        error!(
                            capability = %self.capability,
                            provider = %provider,
                            latency_ms = latency.as_millis() as u64,
                            error = %error,
                            "Final provider failed, chain exhausted"
                        );
                    } else {
                        warn!(
                            capability = %self.capability,
                            provider = %provider,
                            latency_ms = latency.as_millis() as u64,
                            error = %error,
                            "Provider failed, falling back to next provider"
                        );
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(RelayError::ServiceUnavailable {
            capability: self.capability.to_string(),
            detail: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        })
    }

    async fn attempt_one<'a, T, F>(&self, provider: &'a P, attempt: &mut F) -> ProviderResult<T>
    where
        F: FnMut(&'a P) -> BoxFuture<'a, Result<T, ProviderError>>,
    {
        let name = provider.name().to_string();
        let started = Instant::now();

        // A timeout is just another failure
        let outcome = match tokio::time::timeout(self.timeout, attempt(provider)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        };
        let latency = started.elapsed();

        match outcome {
            Ok(value) => ProviderResult::Success { provider: name, latency, value },
            Err(error) => ProviderResult::Failure { provider: name, latency, error },
        }
    }
}
