use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use switchboard_core::document::{markdown, Document, Node, StatusKind};
use switchboard_core::errors::InvokeError;
use switchboard_core::intent::{strip_mentions, GENERAL_HANDLER};
use switchboard_core::resilience::ResilientInvoker;
use tracing::{info, warn};

use crate::json_document::document_from_json;
use crate::llm::{ConversationContext, TextGenerator, LLM_SERVICE};
use crate::tools::{ActionProvider, ActionRule, ActionTable, ACTIONS_SERVICE};

pub struct HandlerRequest<'a> {
    pub text: &'a str,
    pub context: &'a ConversationContext,
    pub correlation_id: &'a str,
}

/// Turns one classified message into a response document. Handlers never
/// fail: service errors are reported inside the document.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    fn id(&self) -> &str;
    async fn handle(&self, request: &HandlerRequest<'_>) -> Document;
}

/// Renders an invocation failure as an error status line the user can read.
pub fn failure_document(error: InvokeError, correlation_id: &str) -> Document {
    let service = error.service().to_owned();
    let interface = error.into_interface(correlation_id);
    warn!(
        event_name = "agent.handler.failed",
        correlation_id,
        service = %service,
        error = %interface,
        "service call failed"
    );

    let text = match interface.user_detail() {
        Some(detail) => format!("{} ({detail})", interface.user_message()),
        None => interface.user_message().to_owned(),
    };
    Document::new().with(Node::status(StatusKind::Error, text))
}

/// Handler backed by gateway actions: picks an action from its table and
/// lays the JSON result out as a document.
pub struct ActionHandler {
    id: String,
    table: ActionTable,
    provider: Arc<dyn ActionProvider>,
    invoker: Arc<ResilientInvoker>,
}

impl ActionHandler {
    pub fn new(
        id: impl Into<String>,
        table: ActionTable,
        provider: Arc<dyn ActionProvider>,
        invoker: Arc<ResilientInvoker>,
    ) -> Self {
        Self { id: id.into(), table, provider, invoker }
    }

    pub fn notion(provider: Arc<dyn ActionProvider>, invoker: Arc<ResilientInvoker>) -> Self {
        let table = ActionTable::new(
            vec![
                ActionRule { action: "NOTION_CREATE_NOTION_PAGE", keywords: &["create", "new"] },
                ActionRule { action: "NOTION_INSERT_ROW_DATABASE", keywords: &["insert", "row"] },
                ActionRule { action: "NOTION_ADD_PAGE_CONTENT", keywords: &["add", "append"] },
                ActionRule { action: "NOTION_CREATE_COMMENT", keywords: &["comment"] },
                ActionRule { action: "NOTION_ARCHIVE_NOTION_PAGE", keywords: &["archive"] },
                ActionRule { action: "NOTION_LIST_DATABASES", keywords: &["databases"] },
            ],
            "NOTION_SEARCH",
        );
        Self::new("notion", table, provider, invoker)
    }

    pub fn amazon(provider: Arc<dyn ActionProvider>, invoker: Arc<ResilientInvoker>) -> Self {
        let table = ActionTable::new(
            vec![
                ActionRule { action: "JUNGLESCOUT_SALES_ESTIMATES", keywords: &["sales", "asin"] },
                ActionRule {
                    action: "JUNGLESCOUT_KEYWORDS_BY_KEYWORD",
                    keywords: &["keyword", "keywords", "trends"],
                },
                ActionRule { action: "JUNGLESCOUT_SHARE_OF_VOICE", keywords: &["competitor", "competitors"] },
            ],
            "JUNGLESCOUT_PRODUCT_DATABASE",
        );
        Self::new("amazon", table, provider, invoker)
    }

    pub fn workflow(provider: Arc<dyn ActionProvider>, invoker: Arc<ResilientInvoker>) -> Self {
        let table = ActionTable::new(
            vec![
                ActionRule {
                    action: "N8N_EXECUTE_WORKFLOW",
                    keywords: &["run", "execute", "trigger", "start"],
                },
                ActionRule { action: "N8N_ACTIVATE_WORKFLOW", keywords: &["activate", "enable"] },
                ActionRule { action: "N8N_LIST_EXECUTIONS", keywords: &["executions", "history"] },
            ],
            "N8N_LIST_WORKFLOWS",
        );
        Self::new("workflow", table, provider, invoker)
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.actions()
    }
}

#[async_trait]
impl DomainHandler for ActionHandler {
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, request: &HandlerRequest<'_>) -> Document {
        let query = strip_mentions(request.text).trim().to_owned();
        let action = self.table.select(&query);
        let params = json!({
            "query": query,
            "user_id": request.context.user_id,
            "conversation_id": request.context.conversation_id,
        });
        info!(
            event_name = "agent.handler.action",
            correlation_id = request.correlation_id,
            handler_id = %self.id,
            action,
            "calling gateway action"
        );

        let outcome = self
            .invoker
            .invoke(ACTIONS_SERVICE, || {
                let provider = Arc::clone(&self.provider);
                let params = params.clone();
                async move { provider.call(action, params).await }
            })
            .await;

        match outcome {
            Ok(value) => document_from_json(&value),
            Err(error) => failure_document(error, request.correlation_id),
        }
    }
}

/// Fallback handler answering with the text generator.
pub struct GeneralHandler {
    generator: Arc<dyn TextGenerator>,
    invoker: Arc<ResilientInvoker>,
}

impl GeneralHandler {
    pub fn new(generator: Arc<dyn TextGenerator>, invoker: Arc<ResilientInvoker>) -> Self {
        Self { generator, invoker }
    }
}

#[async_trait]
impl DomainHandler for GeneralHandler {
    fn id(&self) -> &str {
        GENERAL_HANDLER
    }

    async fn handle(&self, request: &HandlerRequest<'_>) -> Document {
        let prompt = strip_mentions(request.text).trim().to_owned();

        let outcome = self
            .invoker
            .invoke(LLM_SERVICE, || {
                let generator = Arc::clone(&self.generator);
                let prompt = prompt.clone();
                let context = request.context.clone();
                async move { generator.generate(&prompt, &context).await }
            })
            .await;

        match outcome {
            Ok(text) => markdown::parse(&text),
            Err(error) => failure_document(error, request.correlation_id),
        }
    }
}
