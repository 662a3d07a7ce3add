use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use super::retry::RetryPolicy;

/// Retry, breaker and timeout settings for one logical service.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceProfile {
    pub retry: Arc<RetryPolicy>,
    pub breaker: BreakerConfig,
    pub call_timeout: Duration,
}

impl Default for ServiceProfile {
    fn default() -> Self {
        Self {
            retry: Arc::new(RetryPolicy::default()),
            breaker: BreakerConfig::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ServiceProfile {
    pub fn new(retry: RetryPolicy, breaker: BreakerConfig, call_timeout: Duration) -> Self {
        Self { retry: Arc::new(retry), breaker, call_timeout }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct CallStats {
    last_latency: Option<Duration>,
    total_calls: u64,
    failed_calls: u64,
}

#[derive(Debug)]
pub struct ServiceEntry {
    profile: ServiceProfile,
    breaker: CircuitBreaker,
    stats: Mutex<CallStats>,
}

impl ServiceEntry {
    fn new(name: &str, profile: ServiceProfile) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, profile.breaker),
            profile,
            stats: Mutex::new(CallStats::default()),
        }
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub(crate) fn record_call(&self, latency: Duration, succeeded: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.last_latency = Some(latency);
        stats.total_calls += 1;
        if !succeeded {
            stats.failed_calls += 1;
        }
    }

    fn health(&self) -> ServiceHealth {
        let breaker = self.breaker.snapshot();
        let stats = *self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        ServiceHealth {
            state: breaker.state,
            consecutive_failures: breaker.consecutive_failures,
            failure_threshold: breaker.failure_threshold,
            last_transition_at: breaker.last_transition_at,
            last_latency_ms: stats.last_latency.map(|latency| latency.as_millis() as u64),
            total_calls: stats.total_calls,
            failed_calls: stats.failed_calls,
        }
    }
}

/// Process-wide map of service name to breaker and profile.
///
/// Entries are created on first use from the named profile, or the default
/// profile when the service has none, and live for the life of the registry.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    default_profile: ServiceProfile,
    profiles: HashMap<String, ServiceProfile>,
    entries: RwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl ServiceRegistry {
    pub fn new(default_profile: ServiceProfile) -> Self {
        Self { default_profile, ..Self::default() }
    }

    pub fn with_profile(mut self, service: impl Into<String>, profile: ServiceProfile) -> Self {
        self.profiles.insert(service.into(), profile);
        self
    }

    pub fn profile_for(&self, service: &str) -> &ServiceProfile {
        self.profiles.get(service).unwrap_or(&self.default_profile)
    }

    pub fn entry(&self, service: &str) -> Arc<ServiceEntry> {
        if let Some(entry) =
            self.entries.read().unwrap_or_else(PoisonError::into_inner).get(service)
        {
            return entry.clone();
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(service.to_owned())
            .or_insert_with(|| {
                debug!(event_name = "resilience.registry.created", service, "registered service");
                Arc::new(ServiceEntry::new(service, self.profile_for(service).clone()))
            })
            .clone()
    }

    pub fn service_names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    fn health(&self) -> BTreeMap<String, ServiceHealth> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| (name.clone(), entry.health()))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub last_transition_at: DateTime<Utc>,
    pub last_latency_ms: Option<u64>,
    pub total_calls: u64,
    pub failed_calls: u64,
}

/// Read-only view over every registered breaker.
#[derive(Clone, Debug)]
pub struct HealthRegistry {
    registry: Arc<ServiceRegistry>,
}

impl HealthRegistry {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.registry.health()
    }

    /// Names of services whose breaker is currently open.
    pub fn open_services(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(_, health)| health.state == CircuitState::Open)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.open_services().is_empty()
    }
}
