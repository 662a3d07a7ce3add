use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::breaker::Admission;
use super::registry::{HealthRegistry, ServiceEntry, ServiceRegistry};
use super::retry::RetryPolicy;
use crate::errors::{InvokeError, ServiceError, ServiceErrorKind, UNCLASSIFIED_ATTEMPT_CAP};

/// Wraps every outbound call with timeout, bounded retries and the service's
/// circuit breaker.
#[derive(Debug)]
pub struct ResilientInvoker {
    registry: Arc<ServiceRegistry>,
    rng: Mutex<StdRng>,
}

impl ResilientInvoker {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry, rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub fn with_seed(registry: Arc<ServiceRegistry>, seed: u64) -> Self {
        Self { registry, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn health(&self) -> HealthRegistry {
        HealthRegistry::new(self.registry.clone())
    }

    /// Runs `action` under the service's breaker, timeout and retry budget.
    ///
    /// Each attempt runs on its own task. A caller that stops waiting
    /// discards the result, but the attempt still completes or times out and
    /// settles the breaker.
    pub async fn invoke<T, F, Fut>(&self, service: &str, mut action: F) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        let entry = self.registry.entry(service);
        let profile = entry.profile().clone();
        let mut budget = profile.retry.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < budget {
            if entry.breaker().allow() == Admission::FailFast {
                debug!(
                    event_name = "resilience.invoke.fail_fast",
                    service,
                    attempts,
                    "circuit open, call rejected"
                );
                return Err(InvokeError::ServiceUnavailable { service: service.to_owned() });
            }

            attempts += 1;
            let error = match run_attempt(Arc::clone(&entry), action()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                warn!(
                    event_name = "resilience.invoke.permanent",
                    service,
                    attempt = attempts,
                    error = %error,
                    "request rejected by service"
                );
                return Err(InvokeError::PermanentRequest { service: service.to_owned(), source: error });
            }
            if error.kind == ServiceErrorKind::Unclassified {
                budget = budget.min(UNCLASSIFIED_ATTEMPT_CAP);
            }

            if attempts < budget {
                let delay = self.delay_for(&profile.retry, attempts);
                warn!(
                    event_name = "resilience.invoke.retry",
                    service,
                    attempt = attempts,
                    max_attempts = budget,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after failure"
                );
                last_error = Some(error);
                tokio::time::sleep(delay).await;
            } else {
                last_error = Some(error);
            }
        }

        let last = last_error.unwrap_or_else(|| ServiceError::unclassified("no attempt completed"));
        warn!(
            event_name = "resilience.invoke.exhausted",
            service,
            attempts,
            error = %last,
            "retries exhausted"
        );
        Err(InvokeError::RetriesExhausted { service: service.to_owned(), attempts, last })
    }

    fn delay_for(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        policy.delay_for(attempt, &mut *rng).unwrap_or(Duration::ZERO)
    }
}

async fn run_attempt<T, Fut>(entry: Arc<ServiceEntry>, call: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    T: Send + 'static,
{
    let call_timeout = entry.profile().call_timeout;
    let attempt = tokio::spawn(async move {
        let guard = AttemptGuard::new(entry);
        match tokio::time::timeout(call_timeout, call).await {
            Ok(Ok(value)) => {
                guard.settle(true);
                Ok(value)
            }
            Ok(Err(error)) => {
                guard.settle(false);
                Err(error)
            }
            Err(_) => {
                guard.settle(false);
                Err(ServiceError::timed_out(call_timeout))
            }
        }
    });

    attempt.await.unwrap_or_else(|join_error| {
        Err(ServiceError::unclassified(format!("attempt did not complete: {join_error}")))
    })
}

/// Books one attempt's latency and outcome. An attempt that unwinds before
/// it settles gives back a held half-open slot.
struct AttemptGuard {
    entry: Arc<ServiceEntry>,
    started: Instant,
    settled: bool,
}

impl AttemptGuard {
    fn new(entry: Arc<ServiceEntry>) -> Self {
        Self { entry, started: Instant::now(), settled: false }
    }

    fn settle(mut self, succeeded: bool) {
        self.settled = true;
        self.entry.record_call(self.started.elapsed(), succeeded);
        if succeeded {
            self.entry.breaker().record_success();
        } else {
            self.entry.breaker().record_failure();
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.entry.breaker().abandon_attempt();
        }
    }
}
