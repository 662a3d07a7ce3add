use switchboard_core::document::{Document, Node, StatusKind};
use switchboard_core::render::{plan, render, PlatformLimits};
use switchboard_core::resilience::{CircuitState, HealthRegistry};
use thiserror::Error;

use crate::blocks::{self, message_from_batch, MessageTemplate};

pub const ASSISTANT_COMMAND: &str = "/assistant";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_ts: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub verb: String,
    pub freeform_args: String,
    pub channel_id: String,
    pub user_id: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssistantCommand {
    Help,
    Status,
    Unknown { verb: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

pub fn normalize_assistant_command(
    payload: SlashCommandPayload,
) -> Result<CommandEnvelope, CommandParseError> {
    if payload.command != ASSISTANT_COMMAND {
        return Err(CommandParseError::UnsupportedCommand(payload.command));
    }

    let text = payload.text.trim().to_owned();
    let mut parts = text.split_whitespace();
    let verb = parts.next().unwrap_or("help").to_ascii_lowercase();
    let freeform_args = parts.collect::<Vec<_>>().join(" ");

    Ok(CommandEnvelope {
        verb,
        freeform_args,
        channel_id: payload.channel_id,
        user_id: payload.user_id,
        request_id: payload.request_id,
    })
}

pub fn parse_assistant_command(verb: &str) -> AssistantCommand {
    match verb {
        "" | "help" | "?" => AssistantCommand::Help,
        "status" | "health" => AssistantCommand::Status,
        other => AssistantCommand::Unknown { verb: other.to_owned() },
    }
}

/// Answers `/assistant` commands. Status goes through the same renderer as
/// regular replies so it obeys the platform limits.
#[derive(Clone, Debug)]
pub struct CommandRouter {
    health: HealthRegistry,
    limits: PlatformLimits,
}

impl CommandRouter {
    pub fn new(health: HealthRegistry, limits: PlatformLimits) -> Self {
        Self { health, limits }
    }

    pub fn route(&self, envelope: &CommandEnvelope) -> Vec<MessageTemplate> {
        match parse_assistant_command(&envelope.verb) {
            AssistantCommand::Help => vec![blocks::help_message()],
            AssistantCommand::Status => self.status_messages(),
            AssistantCommand::Unknown { verb } => vec![blocks::error_message(
                &format!("Unknown command `{verb}`. Try `/assistant help`."),
                &envelope.request_id,
            )],
        }
    }

    fn status_messages(&self) -> Vec<MessageTemplate> {
        let document = status_document(&self.health);
        plan(&render(&document, &self.limits), &self.limits)
            .iter()
            .enumerate()
            .map(|(index, batch)| message_from_batch(batch, index))
            .collect()
    }
}

pub fn status_document(health: &HealthRegistry) -> Document {
    let snapshot = health.snapshot();
    let mut document = Document::new().with(Node::heading(1, "Service health"));
    if snapshot.is_empty() {
        return document.with(Node::status(StatusKind::Success, "No external calls made yet."));
    }

    let headers = ["Service", "State", "Failures", "Latency", "Calls"].map(str::to_owned).to_vec();
    let rows = snapshot
        .iter()
        .map(|(name, service)| {
            vec![
                name.clone(),
                state_label(service.state).to_owned(),
                format!("{}/{}", service.consecutive_failures, service.failure_threshold),
                service
                    .last_latency_ms
                    .map(|latency| format!("{latency} ms"))
                    .unwrap_or_else(|| "-".to_owned()),
                format!("{} ({} failed)", service.total_calls, service.failed_calls),
            ]
        })
        .collect();
    document.push(Node::table(headers, rows));

    let open: Vec<&str> = snapshot
        .iter()
        .filter(|(_, service)| service.state == CircuitState::Open)
        .map(|(name, _)| name.as_str())
        .collect();
    document.push(if open.is_empty() {
        Node::status(StatusKind::Success, "All services are accepting calls.")
    } else {
        Node::status(StatusKind::Error, format!("Failing fast for: {}", open.join(", ")))
    });
    document
}

fn state_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half-open",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use switchboard_core::render::PlatformLimits;
    use switchboard_core::resilience::{
        BreakerConfig, HealthRegistry, ResilientInvoker, RetryPolicy, ServiceProfile,
        ServiceRegistry,
    };
    use switchboard_core::ServiceError;

    use super::{
        normalize_assistant_command, parse_assistant_command, AssistantCommand, CommandParseError,
        CommandRouter, SlashCommandPayload,
    };
    use crate::blocks::{Block, TextObject};

    fn payload(command: &str, text: &str) -> SlashCommandPayload {
        SlashCommandPayload {
            command: command.to_owned(),
            text: text.to_owned(),
            channel_id: "C1".to_owned(),
            user_id: "U1".to_owned(),
            trigger_ts: "1".to_owned(),
            request_id: "req-1".to_owned(),
        }
    }

    fn all_text(blocks: &[Block]) -> String {
        blocks
            .iter()
            .flat_map(|block| match block {
                Block::Section { text, fields, .. } => {
                    text.iter().chain(fields.iter()).map(TextObject::text).collect::<Vec<_>>()
                }
                Block::Context { elements, .. } => elements.iter().map(TextObject::text).collect(),
                Block::Divider { .. } => Vec::new(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn normalize_defaults_to_help_and_rejects_other_commands() {
        let envelope = normalize_assistant_command(payload("/assistant", "   ")).expect("normalize");
        assert_eq!(envelope.verb, "help");
        assert_eq!(
            normalize_assistant_command(payload("/deploy", "help")),
            Err(CommandParseError::UnsupportedCommand("/deploy".to_owned()))
        );
    }

    #[test]
    fn parse_recognizes_known_verbs() {
        assert_eq!(parse_assistant_command("help"), AssistantCommand::Help);
        assert_eq!(parse_assistant_command("status"), AssistantCommand::Status);
        assert_eq!(
            parse_assistant_command("deploy"),
            AssistantCommand::Unknown { verb: "deploy".to_owned() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_lists_open_breakers() {
        let registry = Arc::new(ServiceRegistry::new(ServiceProfile::new(
            RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(10)),
            BreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_secs(60) },
            Duration::from_secs(1),
        )));
        let invoker = ResilientInvoker::with_seed(registry.clone(), 2);
        let _: Result<(), _> =
            invoker.invoke("composio", || async { Err(ServiceError::transient("503")) }).await;
        let router = CommandRouter::new(HealthRegistry::new(registry), PlatformLimits::default());

        let envelope = normalize_assistant_command(payload("/assistant", "status")).expect("normalize");
        let messages = router.route(&envelope);

        assert_eq!(messages.len(), 1);
        let text = all_text(&messages[0].blocks);
        assert!(text.contains("composio"), "{text}");
        assert!(text.contains("Failing fast for: composio"), "{text}");
    }

    #[test]
    fn status_without_calls_reports_idle_registry() {
        let registry = Arc::new(ServiceRegistry::new(ServiceProfile::default()));
        let router = CommandRouter::new(HealthRegistry::new(registry), PlatformLimits::default());
        let envelope = normalize_assistant_command(payload("/assistant", "status")).expect("normalize");

        let text = all_text(&router.route(&envelope)[0].blocks);

        assert!(text.contains("No external calls made yet."), "{text}");
    }

    #[test]
    fn unknown_verb_points_to_help() {
        let registry = Arc::new(ServiceRegistry::new(ServiceProfile::default()));
        let router = CommandRouter::new(HealthRegistry::new(registry), PlatformLimits::default());
        let envelope = normalize_assistant_command(payload("/assistant", "deploy now")).expect("normalize");

        let text = all_text(&router.route(&envelope)[0].blocks);

        assert!(text.contains("/assistant help"));
        assert!(text.contains("req-1"));
    }
}
