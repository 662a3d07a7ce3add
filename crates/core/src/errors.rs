use std::time::Duration;

use thiserror::Error;

/// Attempt ceiling for failures a provider could not classify.
pub const UNCLASSIFIED_ATTEMPT_CAP: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Network failure, timeout, 5xx. Safe to retry.
    Transient,
    /// 4xx, validation, unsupported action. Never retried.
    Permanent,
    /// The provider did not say; retried as transient under a strict cap.
    Unclassified,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?} service error: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: ServiceErrorKind::Transient, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { kind: ServiceErrorKind::Permanent, message: message.into() }
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self { kind: ServiceErrorKind::Unclassified, message: message.into() }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self::transient(format!("timed out after {}ms", limit.as_millis()))
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, ServiceErrorKind::Permanent)
    }

    /// Maps an HTTP status code onto the transient/permanent split.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 425 | 429 => Self::transient(message),
            400..=499 => Self::permanent(message),
            500..=599 => Self::transient(message),
            _ => Self::unclassified(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("service `{service}` is unavailable (circuit open)")]
    ServiceUnavailable { service: String },
    #[error("service `{service}` failed after {attempts} attempts: {last}")]
    RetriesExhausted { service: String, attempts: u32, last: ServiceError },
    #[error("service `{service}` rejected the request: {source}")]
    PermanentRequest {
        service: String,
        #[source]
        source: ServiceError,
    },
}

impl InvokeError {
    pub fn service(&self) -> &str {
        match self {
            Self::ServiceUnavailable { service }
            | Self::RetriesExhausted { service, .. }
            | Self::PermanentRequest { service, .. } => service,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "Sorry, that service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    /// Provider detail worth showing to the user; only bad requests carry one.
    pub fn user_detail(&self) -> Option<&str> {
        match self {
            Self::BadRequest { message, .. } => Some(message),
            Self::ServiceUnavailable { .. } => None,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl InvokeError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<InvokeError> for InterfaceError {
    fn from(value: InvokeError) -> Self {
        match value {
            InvokeError::ServiceUnavailable { service } => Self::ServiceUnavailable {
                message: format!("circuit open for `{service}`"),
                correlation_id: "unassigned".to_owned(),
            },
            InvokeError::RetriesExhausted { service, attempts, last } => Self::ServiceUnavailable {
                message: format!("`{service}` failed after {attempts} attempts: {}", last.message),
                correlation_id: "unassigned".to_owned(),
            },
            InvokeError::PermanentRequest { source, .. } => {
                Self::BadRequest { message: source.message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InterfaceError, InvokeError, ServiceError, ServiceErrorKind};

    #[test]
    fn status_codes_split_into_transient_and_permanent() {
        assert_eq!(ServiceError::from_status(503, "down").kind, ServiceErrorKind::Transient);
        assert_eq!(ServiceError::from_status(429, "slow down").kind, ServiceErrorKind::Transient);
        assert_eq!(ServiceError::from_status(404, "missing").kind, ServiceErrorKind::Permanent);
        assert_eq!(ServiceError::from_status(302, "moved").kind, ServiceErrorKind::Unclassified);
    }

    #[test]
    fn unclassified_errors_are_retryable() {
        assert!(ServiceError::unclassified("?").is_retryable());
        assert!(!ServiceError::permanent("bad").is_retryable());
    }

    #[test]
    fn circuit_open_maps_to_service_unavailable_with_apology() {
        let interface = InvokeError::ServiceUnavailable { service: "composio".to_owned() }
            .into_interface("req-1");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-1");
        assert!(interface.user_message().starts_with("Sorry"));
        assert_eq!(interface.user_detail(), None);
    }

    #[test]
    fn exhausted_retries_map_to_service_unavailable() {
        let interface = InvokeError::RetriesExhausted {
            service: "llm".to_owned(),
            attempts: 3,
            last: ServiceError::transient("502"),
        }
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn permanent_errors_keep_provider_detail_for_the_user() {
        let interface = InvokeError::PermanentRequest {
            service: "composio".to_owned(),
            source: ServiceError::permanent("database_id is not a valid uuid"),
        }
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(interface.user_detail(), Some("database_id is not a valid uuid"));
    }
}
