//! Assistant runtime: domain handlers behind the resilient invoker.
//!
//! Every inbound message takes the same path:
//! 1. **Classification** (`switchboard_core::intent`) picks a handler id
//! 2. **Handling** (`handlers`) calls the action gateway or the text
//!    generator through `ResilientInvoker` and builds a `Document`
//! 3. **Rendering and planning** (`switchboard_core::render`) turn the document
//!    into delivery batches
//!
//! External services are reached only through the `ActionProvider` and
//! `TextGenerator` traits, so handlers are tested with in-memory fakes.

pub mod handlers;
pub mod json_document;
pub mod llm;
pub mod runtime;
pub mod tools;

pub use handlers::{ActionHandler, DomainHandler, GeneralHandler, HandlerRequest};
pub use llm::{ConversationContext, TextGenerator, LLM_SERVICE};
pub use runtime::{AssistantReply, AssistantRuntime, InboundMessage};
pub use tools::{ActionProvider, UnconfiguredActionProvider, ACTIONS_SERVICE};
