use async_trait::async_trait;
use switchboard_core::errors::ServiceError;

/// Name of the resilience profile text generation is made under.
pub const LLM_SERVICE: &str = "llm";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub user_id: String,
    /// Earlier messages of the same thread, oldest first.
    pub recent_turns: Vec<String>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &ConversationContext,
    ) -> Result<String, ServiceError>;
}
