//! Core of the switchboard assistant: intent routing, resilient invocation of
//! external services and bounded rendering of responses.

pub mod config;
pub mod document;
pub mod errors;
pub mod intent;
pub mod render;
pub mod resilience;

pub use document::{Document, Emphasis, InlineRun, Node, StatusKind};
pub use errors::{InterfaceError, InvokeError, ServiceError, ServiceErrorKind};
pub use intent::{Confidence, ConversationState, IntentClassifier, IntentDecision, Route};
pub use render::{plan, render, BlockKind, DeliveryBatch, PlatformLimits, RenderedBlock};
pub use resilience::{
    CircuitState, HealthRegistry, ResilientInvoker, RetryPolicy, ServiceProfile, ServiceRegistry,
};
