//! Slack interface of the assistant.
//!
//! - **Socket Mode** (`socket`) - envelope loop with reconnection, one task per envelope
//! - **Events** (`events`) - thread messages go to the assistant runtime
//! - **Slash Commands** (`commands`) - `/assistant help`, `/assistant status`
//! - **Block Kit** (`blocks`) - message builders and delivery batch serialization
//! - **Outbox** (`outbox`) - per-conversation single writer in front of a `MessageSink`
//!
//! ```text
//! Socket Mode → EventDispatcher → AssistantRuntime → DeliveryBatch
//!                                                        ↓
//!                         MessageSink ← Outbox ← Block Kit message
//! ```

pub mod blocks;
pub mod commands;
pub mod events;
pub mod outbox;
pub mod socket;
