//! Resilient invocation of external services.
//!
//! Every outbound call goes through [`ResilientInvoker::invoke`], which looks up
//! the service's [`CircuitBreaker`] and [`RetryPolicy`] in the shared
//! [`ServiceRegistry`] and enforces a per-attempt timeout.

pub mod breaker;
pub mod invoker;
pub mod registry;
pub mod retry;

pub use breaker::{Admission, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use invoker::ResilientInvoker;
pub use registry::{HealthRegistry, ServiceEntry, ServiceHealth, ServiceProfile, ServiceRegistry};
pub use retry::{AttemptsExhausted, RetryPolicy};
