use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use switchboard_core::document::{Document, Node, StatusKind};
use switchboard_core::intent::{ConversationState, IntentClassifier, IntentDecision, GENERAL_HANDLER};
use switchboard_core::render::{plan, render, DeliveryBatch, PlatformLimits};
use switchboard_core::resilience::ResilientInvoker;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers::{ActionHandler, DomainHandler, GeneralHandler, HandlerRequest};
use crate::llm::{ConversationContext, TextGenerator};
use crate::tools::ActionProvider;

const MAX_RECENT_TURNS: usize = 10;

/// Bounds on per-conversation memory: idle threads expire, and past the cap
/// the least recently active thread is evicted first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLimits {
    pub idle_ttl: Duration,
    pub max_conversations: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self { idle_ttl: Duration::from_secs(60 * 60), max_conversations: 10_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub text: String,
    pub conversation_id: String,
    pub user_id: String,
}

impl InboundMessage {
    pub fn new(
        text: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self { text: text.into(), conversation_id: conversation_id.into(), user_id: user_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssistantReply {
    pub correlation_id: String,
    pub decision: IntentDecision,
    pub batches: Vec<DeliveryBatch>,
}

struct ConversationMemory {
    state: ConversationState,
    recent_turns: Vec<String>,
    last_seen: Instant,
}

impl ConversationMemory {
    fn new(now: Instant) -> Self {
        Self { state: ConversationState::default(), recent_turns: Vec::new(), last_seen: now }
    }
}

/// Routes each inbound message to a domain handler and turns the handler's
/// document into delivery batches. Conversations only share the invoker.
pub struct AssistantRuntime {
    classifier: IntentClassifier,
    handlers: HashMap<String, Arc<dyn DomainHandler>>,
    limits: PlatformLimits,
    memory_limits: MemoryLimits,
    memory: Mutex<HashMap<String, ConversationMemory>>,
}

impl AssistantRuntime {
    pub fn new(classifier: IntentClassifier, limits: PlatformLimits) -> Self {
        Self {
            classifier,
            handlers: HashMap::new(),
            limits,
            memory_limits: MemoryLimits::default(),
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime with the notion, amazon, workflow and general handlers.
    pub fn standard(
        provider: Arc<dyn ActionProvider>,
        generator: Arc<dyn TextGenerator>,
        invoker: Arc<ResilientInvoker>,
        limits: PlatformLimits,
    ) -> Self {
        Self::new(IntentClassifier::default(), limits)
            .with_handler(Arc::new(ActionHandler::notion(provider.clone(), invoker.clone())))
            .with_handler(Arc::new(ActionHandler::amazon(provider.clone(), invoker.clone())))
            .with_handler(Arc::new(ActionHandler::workflow(provider, invoker.clone())))
            .with_handler(Arc::new(GeneralHandler::new(generator, invoker)))
    }

    pub fn with_handler(mut self, handler: Arc<dyn DomainHandler>) -> Self {
        self.handlers.insert(handler.id().to_owned(), handler);
        self
    }

    pub fn with_memory_limits(mut self, memory_limits: MemoryLimits) -> Self {
        self.memory_limits = memory_limits;
        self
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn limits(&self) -> &PlatformLimits {
        &self.limits
    }

    pub fn handler_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn classify(&self, message: &InboundMessage) -> IntentDecision {
        let state = self
            .with_live_memory(&message.conversation_id, |memory| memory.state.clone())
            .unwrap_or_default();
        self.classifier.classify(&message.text, &state)
    }

    pub async fn respond(&self, message: &InboundMessage) -> AssistantReply {
        let correlation_id = format!("req-{}", Uuid::new_v4());
        let decision = self.classify(message);
        info!(
            event_name = "agent.runtime.classified",
            correlation_id = %correlation_id,
            conversation_id = %message.conversation_id,
            handler_id = %decision.handler_id,
            confidence = ?decision.confidence,
            "message classified"
        );

        let context = ConversationContext {
            conversation_id: message.conversation_id.clone(),
            user_id: message.user_id.clone(),
            recent_turns: self.recent_turns(&message.conversation_id),
        };
        let document = match self.handler_for(&decision.handler_id) {
            Some(handler) => {
                let request = HandlerRequest {
                    text: &message.text,
                    context: &context,
                    correlation_id: &correlation_id,
                };
                handler.handle(&request).await
            }
            None => {
                warn!(
                    event_name = "agent.runtime.unrouted",
                    correlation_id = %correlation_id,
                    handler_id = %decision.handler_id,
                    "no handler registered"
                );
                Document::new().with(Node::status(
                    StatusKind::Error,
                    "Sorry, I can't handle that kind of request yet.",
                ))
            }
        };

        self.remember(message, &decision);
        let batches = plan(&render(&document, &self.limits), &self.limits);
        info!(
            event_name = "agent.runtime.responded",
            correlation_id = %correlation_id,
            conversation_id = %message.conversation_id,
            batches = batches.len(),
            "response planned"
        );

        AssistantReply { correlation_id, decision, batches }
    }

    /// Drops the memory of a torn-down conversation.
    pub fn forget(&self, conversation_id: &str) {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner).remove(conversation_id);
    }

    pub fn remembered_conversations(&self) -> usize {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn handler_for(&self, handler_id: &str) -> Option<&Arc<dyn DomainHandler>> {
        self.handlers.get(handler_id).or_else(|| self.handlers.get(GENERAL_HANDLER))
    }

    fn recent_turns(&self, conversation_id: &str) -> Vec<String> {
        self.with_live_memory(conversation_id, |memory| memory.recent_turns.clone())
            .unwrap_or_default()
    }

    /// Reads a conversation's memory unless it has been idle past the ttl.
    fn with_live_memory<R>(
        &self,
        conversation_id: &str,
        read: impl FnOnce(&ConversationMemory) -> R,
    ) -> Option<R> {
        let memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        memory
            .get(conversation_id)
            .filter(|entry| entry.last_seen.elapsed() <= self.memory_limits.idle_ttl)
            .map(read)
    }

    fn remember(&self, message: &InboundMessage, decision: &IntentDecision) {
        let now = Instant::now();
        let mut memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);

        let idle_ttl = self.memory_limits.idle_ttl;
        let before = memory.len();
        memory.retain(|_, entry| now.duration_since(entry.last_seen) <= idle_ttl);
        let mut evicted = before - memory.len();

        let entry = memory
            .entry(message.conversation_id.clone())
            .or_insert_with(|| ConversationMemory::new(now));
        entry.last_seen = now;
        entry.state.remember(decision);
        entry.recent_turns.push(message.text.clone());
        if entry.recent_turns.len() > MAX_RECENT_TURNS {
            let excess = entry.recent_turns.len() - MAX_RECENT_TURNS;
            entry.recent_turns.drain(..excess);
        }

        while memory.len() > self.memory_limits.max_conversations.max(1) {
            let oldest = memory
                .iter()
                .filter(|(id, _)| *id != &message.conversation_id)
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            memory.remove(&id);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                event_name = "agent.runtime.memory_evicted",
                evicted,
                remembered = memory.len(),
                "expired conversation memory dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use switchboard_core::errors::ServiceError;
    use switchboard_core::intent::Confidence;
    use switchboard_core::render::{BlockKind, PlatformLimits};
    use switchboard_core::resilience::{ResilientInvoker, ServiceProfile, ServiceRegistry};

    use super::{AssistantRuntime, InboundMessage, MemoryLimits};
    use crate::llm::{ConversationContext, TextGenerator};
    use crate::tools::ActionProvider;

    struct StaticProvider {
        actions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionProvider for StaticProvider {
        async fn call(&self, action: &str, _params: Value) -> Result<Value, ServiceError> {
            self.actions.lock().expect("actions lock").push(action.to_owned());
            Ok(json!({ "results": [{ "title": "Roadmap", "url": "https://notion.so/roadmap" }] }))
        }
    }

    struct EchoGenerator {
        contexts: Mutex<Vec<ConversationContext>>,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(
            &self,
            prompt: &str,
            context: &ConversationContext,
        ) -> Result<String, ServiceError> {
            self.contexts.lock().expect("contexts lock").push(context.clone());
            Ok(format!("echo: {prompt}"))
        }
    }

    fn runtime() -> (AssistantRuntime, Arc<StaticProvider>, Arc<EchoGenerator>) {
        let provider = Arc::new(StaticProvider { actions: Mutex::new(Vec::new()) });
        let generator = Arc::new(EchoGenerator { contexts: Mutex::new(Vec::new()) });
        let invoker = Arc::new(ResilientInvoker::with_seed(
            Arc::new(ServiceRegistry::new(ServiceProfile::default())),
            9,
        ));
        let runtime = AssistantRuntime::standard(
            provider.clone(),
            generator.clone(),
            invoker,
            PlatformLimits::default(),
        );
        (runtime, provider, generator)
    }

    #[tokio::test]
    async fn search_message_is_answered_by_notion_handler() {
        let (runtime, provider, _) = runtime();

        let reply = runtime.respond(&InboundMessage::new("search for roadmap", "C1:1", "U1")).await;

        assert_eq!(reply.decision.handler_id, "notion");
        assert_eq!(reply.decision.confidence, Confidence::Certain);
        assert!(reply.correlation_id.starts_with("req-"));
        assert_eq!(provider.actions.lock().expect("actions lock").as_slice(), ["NOTION_SEARCH"]);
        assert_eq!(reply.batches.len(), 1);
        assert_eq!(reply.batches[0].blocks[0].kind, BlockKind::Actions);
    }

    #[tokio::test]
    async fn follow_up_in_same_thread_stays_with_previous_handler() {
        let (runtime, _, generator) = runtime();

        runtime.respond(&InboundMessage::new("search for roadmap", "C1:1", "U1")).await;
        let follow_up = runtime.respond(&InboundMessage::new("and the other one?", "C1:1", "U1")).await;
        let other_thread = runtime.respond(&InboundMessage::new("and the other one?", "C1:2", "U1")).await;

        assert_eq!(follow_up.decision.handler_id, "notion");
        assert_eq!(follow_up.decision.confidence, Confidence::Heuristic);
        assert_eq!(other_thread.decision.handler_id, "general");
        assert!(generator.contexts.lock().expect("contexts lock")[0].recent_turns.is_empty());
    }

    #[tokio::test]
    async fn general_handler_sees_recent_turns_of_the_thread() {
        let (runtime, _, generator) = runtime();

        runtime.respond(&InboundMessage::new("hello there", "C9:1", "U1")).await;
        runtime.respond(&InboundMessage::new("how are you", "C9:1", "U1")).await;

        let contexts = generator.contexts.lock().expect("contexts lock");
        assert_eq!(contexts[1].recent_turns, vec!["hello there".to_owned()]);
        assert_eq!(contexts[1].conversation_id, "C9:1");
    }

    #[tokio::test]
    async fn forgotten_conversation_loses_its_handler_memory() {
        let (runtime, _, _) = runtime();

        runtime.respond(&InboundMessage::new("search for roadmap", "C1:1", "U1")).await;
        runtime.forget("C1:1");
        let reply = runtime.respond(&InboundMessage::new("and the other one?", "C1:1", "U1")).await;

        assert_eq!(reply.decision.handler_id, "general");
        assert_eq!(runtime.handler_ids(), vec!["amazon", "general", "notion", "workflow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_conversations_expire_from_memory() {
        let (runtime, _, _) = runtime();
        let runtime = runtime.with_memory_limits(MemoryLimits {
            idle_ttl: Duration::from_secs(60),
            max_conversations: 100,
        });

        runtime.respond(&InboundMessage::new("search for roadmap", "C1:1", "U1")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let follow_up = runtime.respond(&InboundMessage::new("and the other one?", "C1:1", "U1")).await;
        assert_eq!(follow_up.decision.handler_id, "general");

        runtime.respond(&InboundMessage::new("hello", "C2:1", "U1")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        runtime.respond(&InboundMessage::new("hello", "C3:1", "U1")).await;
        assert_eq!(runtime.remembered_conversations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_cap_evicts_least_recently_active_thread() {
        let (runtime, _, _) = runtime();
        let runtime = runtime.with_memory_limits(MemoryLimits {
            idle_ttl: Duration::from_secs(3600),
            max_conversations: 2,
        });

        for thread in ["C1:1", "C1:2"] {
            runtime.respond(&InboundMessage::new("search for roadmap", thread, "U1")).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        runtime.respond(&InboundMessage::new("search again", "C1:1", "U1")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        runtime.respond(&InboundMessage::new("hello", "C1:3", "U1")).await;

        assert_eq!(runtime.remembered_conversations(), 2);
        let kept = runtime.classify(&InboundMessage::new("and the other one?", "C1:1", "U1"));
        let evicted = runtime.classify(&InboundMessage::new("and the other one?", "C1:2", "U1"));
        assert_eq!(kept.handler_id, "notion");
        assert_eq!(evicted.handler_id, "general");
    }
}
