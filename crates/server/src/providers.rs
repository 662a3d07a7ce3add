//! HTTP clients for the external collaborators: the action gateway, an
//! OpenAI-compatible chat completion endpoint and the Slack Web API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use switchboard_agent::llm::{ConversationContext, TextGenerator};
use switchboard_agent::tools::ActionProvider;
use switchboard_core::errors::ServiceError;
use switchboard_core::resilience::ResilientInvoker;
use switchboard_slack::blocks::MessageTemplate;
use switchboard_slack::events::ReplyTarget;
use switchboard_slack::outbox::{MessageSink, SinkError};
use tracing::debug;

pub const SLACK_SERVICE: &str = "slack";
const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const VALIDATION_ERROR_TYPES: &[&str] = &["validation", "validation_error", "invalid_request"];
const SYSTEM_PROMPT: &str = "You are a helpful workplace assistant in a Slack thread. \
Answer concisely using Markdown headings, bullet lists and tables where they help.";

fn transport_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ServiceError::transient(error.to_string())
    } else if let Some(status) = error.status() {
        ServiceError::from_status(status.as_u16(), error.to_string())
    } else {
        ServiceError::unclassified(error.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::from_status(status.as_u16(), format!("HTTP {status}: {body}")));
    }
    response.json::<Value>().await.map_err(transport_error)
}

/// Executes gateway actions with `POST {base_url}/actions/{action}/execute`.
pub struct HttpActionProvider {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpActionProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_owned(), api_key }
    }
}

#[async_trait]
impl ActionProvider for HttpActionProvider {
    async fn call(&self, action: &str, params: Value) -> Result<Value, ServiceError> {
        let url = format!("{}/actions/{action}/execute", self.base_url);
        let entity_id = params.get("user_id").cloned().unwrap_or(Value::Null);
        let mut request = self
            .client
            .post(&url)
            .json(&json!({ "input": params, "entityId": entity_id }));
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key.expose_secret());
        }

        debug!(event_name = "egress.actions.request", action, "executing gateway action");
        let body = read_json(request.send().await.map_err(transport_error)?).await?;
        action_result(body)
    }
}

/// Unwraps the gateway envelope: `{"successful": bool, "data": .., "error": ..}`.
///
/// A failure envelope is permanent only when it carries a 4xx status or a
/// validation marker. Without either it is unclassified, so the invoker
/// retries it under the strict attempt cap.
pub fn action_result(body: Value) -> Result<Value, ServiceError> {
    let successful = body
        .get("successful")
        .or_else(|| body.get("successfull"))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !successful {
        return Err(action_failure(&body));
    }

    Ok(match body {
        Value::Object(mut object) if object.contains_key("data") => {
            object.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    })
}

fn action_failure(body: &Value) -> ServiceError {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("action reported failure without detail")
        .to_owned();

    let status = ["status_code", "statusCode", "status"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_u64))
        .and_then(|status| u16::try_from(status).ok());
    if let Some(status) = status {
        return ServiceError::from_status(status, message);
    }

    let validation = ["error_type", "errorType"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .is_some_and(|kind| VALIDATION_ERROR_TYPES.contains(&kind.to_ascii_lowercase().as_str()));
    if validation {
        ServiceError::permanent(message)
    } else {
        ServiceError::unclassified(message)
    }
}

/// Text generation over an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpTextGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    request_timeout: Option<Duration>,
}

impl HttpTextGenerator {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            api_key,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(
        &self,
        prompt: &str,
        context: &ConversationContext,
    ) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "messages": chat_messages(prompt, context),
        });
        let mut request = self.client.post(format!("{}/chat/completions", self.endpoint)).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = read_json(request.send().await.map_err(transport_error)?).await?;
        completion_text(&response)
    }
}

pub fn chat_messages(prompt: &str, context: &ConversationContext) -> Vec<Value> {
    let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
    messages.extend(
        context.recent_turns.iter().map(|turn| json!({ "role": "user", "content": turn })),
    );
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}

pub fn completion_text(response: &Value) -> Result<String, ServiceError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ServiceError::unclassified("completion response carried no message content"))
}

/// Posts messages with `chat.postMessage`, through the `slack` resilience profile.
pub struct SlackWebApiSink {
    client: Client,
    bot_token: SecretString,
    invoker: Arc<ResilientInvoker>,
}

impl SlackWebApiSink {
    pub fn new(client: Client, bot_token: SecretString, invoker: Arc<ResilientInvoker>) -> Self {
        Self { client, bot_token, invoker }
    }

    fn post_once(&self, body: Value) -> impl Future<Output = Result<(), ServiceError>> + Send + 'static {
        let request = self
            .client
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body);
        async move {
            let response = request.send().await.map_err(transport_error)?;
            slack_result(&read_json(response).await?)
        }
    }
}

#[async_trait]
impl MessageSink for SlackWebApiSink {
    async fn post(&self, target: &ReplyTarget, message: &MessageTemplate) -> Result<(), SinkError> {
        let body = post_message_body(target, message);
        self.invoker
            .invoke(SLACK_SERVICE, || self.post_once(body.clone()))
            .await
            .map_err(|error| SinkError::Post(error.to_string()))
    }
}

pub fn post_message_body(target: &ReplyTarget, message: &MessageTemplate) -> Value {
    let mut body = json!({
        "channel": target.channel_id,
        "text": message.fallback_text,
        "blocks": message.blocks,
    });
    if let Some(thread_ts) = &target.thread_ts {
        body["thread_ts"] = json!(thread_ts);
    }
    body
}

/// Slack answers HTTP 200 with `{"ok": false}` on failure; rate limits are retryable.
pub fn slack_result(body: &Value) -> Result<(), ServiceError> {
    if body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(());
    }
    let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
    Err(match error {
        "ratelimited" | "service_unavailable" | "internal_error" | "request_timeout"
        | "fatal_error" => ServiceError::transient(error),
        _ => ServiceError::permanent(error),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use switchboard_agent::llm::ConversationContext;
    use switchboard_core::errors::ServiceErrorKind;
    use switchboard_slack::blocks::MessageBuilder;
    use switchboard_slack::events::ReplyTarget;

    use super::{action_result, chat_messages, completion_text, post_message_body, slack_result};

    #[test]
    fn action_envelope_is_unwrapped_or_rejected() {
        assert_eq!(
            action_result(json!({ "successful": true, "data": { "results": [] } })),
            Ok(json!({ "results": [] }))
        );
        assert_eq!(action_result(json!([1, 2])), Ok(json!([1, 2])));

        let error = action_result(json!({
            "successfull": false,
            "error": "invalid database_id",
            "error_type": "validation",
        }))
        .expect_err("failure envelope");
        assert_eq!(error.kind, ServiceErrorKind::Permanent);
        assert_eq!(error.message, "invalid database_id");
    }

    #[test]
    fn untagged_failure_envelope_is_unclassified() {
        let error = action_result(json!({
            "successful": false,
            "error": "Internal server error, please retry",
        }))
        .expect_err("failure envelope");

        assert_eq!(error.kind, ServiceErrorKind::Unclassified);
        assert_eq!(error.message, "Internal server error, please retry");
    }

    #[test]
    fn failure_envelope_status_decides_retryability() {
        let upstream = action_result(json!({ "successful": false, "error": "bad gateway", "status_code": 502 }))
            .expect_err("failure envelope");
        let rejected = action_result(json!({ "successful": false, "error": "not found", "statusCode": 404 }))
            .expect_err("failure envelope");

        assert_eq!(upstream.kind, ServiceErrorKind::Transient);
        assert_eq!(rejected.kind, ServiceErrorKind::Permanent);
    }

    #[test]
    fn chat_messages_replay_recent_turns_before_prompt() {
        let context = ConversationContext {
            recent_turns: vec!["earlier question".to_owned()],
            ..ConversationContext::default()
        };

        let messages = chat_messages("latest", &context);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "earlier question");
        assert_eq!(messages[2]["content"], "latest");
    }

    #[test]
    fn completion_without_content_is_unclassified() {
        let ok = json!({ "choices": [{ "message": { "content": "# Hi" } }] });
        assert_eq!(completion_text(&ok), Ok("# Hi".to_owned()));

        let error = completion_text(&json!({ "choices": [] })).expect_err("no content");
        assert_eq!(error.kind, ServiceErrorKind::Unclassified);
    }

    #[test]
    fn slack_errors_split_into_retryable_and_not() {
        assert_eq!(slack_result(&json!({ "ok": true })), Ok(()));
        assert_eq!(
            slack_result(&json!({ "ok": false, "error": "ratelimited" })).map_err(|e| e.kind),
            Err(ServiceErrorKind::Transient)
        );
        assert_eq!(
            slack_result(&json!({ "ok": false, "error": "channel_not_found" })).map_err(|e| e.kind),
            Err(ServiceErrorKind::Permanent)
        );
    }

    #[test]
    fn post_body_targets_thread_when_present() {
        let message = MessageBuilder::new("hello")
            .section("reply.0.0", |section| {
                section.mrkdwn("hello");
            })
            .build();

        let threaded = post_message_body(
            &ReplyTarget { channel_id: "C1".to_owned(), thread_ts: Some("171.5".to_owned()) },
            &message,
        );
        let top_level =
            post_message_body(&ReplyTarget { channel_id: "C1".to_owned(), thread_ts: None }, &message);

        assert_eq!(threaded["thread_ts"], "171.5");
        assert_eq!(threaded["blocks"][0]["type"], "section");
        assert!(top_level.get("thread_ts").is_none());
    }
}
