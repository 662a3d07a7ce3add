use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use switchboard_agent::runtime::{AssistantRuntime, InboundMessage};
use thiserror::Error;
use tracing::debug;

use crate::{
    blocks::{message_from_batch, MessageTemplate},
    commands::{normalize_assistant_command, CommandParseError, CommandRouter, SlashCommandPayload},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    ThreadMessage(ThreadMessageEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::ThreadMessage(_) => SlackEventType::ThreadMessage,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Where replies to this event are posted.
    pub fn reply_target(&self) -> Option<ReplyTarget> {
        match self {
            Self::SlashCommand(payload) => {
                Some(ReplyTarget { channel_id: payload.channel_id.clone(), thread_ts: None })
            }
            Self::ThreadMessage(event) => Some(ReplyTarget {
                channel_id: event.channel_id.clone(),
                thread_ts: Some(event.thread_ts.clone()),
            }),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    ThreadMessage,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessageEvent {
    pub channel_id: String,
    pub thread_ts: String,
    pub user_id: String,
    pub text: String,
}

impl ThreadMessageEvent {
    /// Conversation key: one conversation per channel thread.
    pub fn conversation_id(&self) -> String {
        format!("{}:{}", self.channel_id, self.thread_ts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub thread_ts: Option<String>,
}

impl ReplyTarget {
    /// Key of the outbox queue serializing posts to this target.
    pub fn conversation_key(&self) -> String {
        match &self.thread_ts {
            Some(thread_ts) => format!("{}:{thread_ts}", self.channel_id),
            None => self.channel_id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(Vec<MessageTemplate>),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn assistant_dispatcher(runtime: Arc<AssistantRuntime>, commands: CommandRouter) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(SlashCommandHandler::new(commands));
    dispatcher.register(ThreadMessageHandler::new(runtime));
    dispatcher
}

pub struct SlashCommandHandler {
    router: CommandRouter,
}

impl SlashCommandHandler {
    pub fn new(router: CommandRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let normalized = normalize_assistant_command(payload.clone())?;
        Ok(HandlerResult::Responded(self.router.route(&normalized)))
    }
}

/// Feeds thread messages to the assistant runtime; blank messages are ignored.
pub struct ThreadMessageHandler {
    runtime: Arc<AssistantRuntime>,
}

impl ThreadMessageHandler {
    pub fn new(runtime: Arc<AssistantRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl EventHandler for ThreadMessageHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ThreadMessage
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ThreadMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.text.trim().is_empty() {
            debug!(
                event_name = "ingress.slack.thread_message_ignored",
                correlation_id = %ctx.correlation_id,
                "blank thread message"
            );
            return Ok(HandlerResult::Ignored);
        }

        let inbound =
            InboundMessage::new(event.text.as_str(), event.conversation_id(), event.user_id.as_str());
        let reply = self.runtime.respond(&inbound).await;
        Ok(HandlerResult::Responded(
            reply
                .batches
                .iter()
                .enumerate()
                .map(|(index, batch)| message_from_batch(batch, index))
                .collect(),
        ))
    }
}
