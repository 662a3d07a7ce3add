use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::blocks::error_message;
use crate::events::{EventContext, EventDispatcher, HandlerResult, SlackEnvelope, SlackEvent};
use crate::outbox::Outbox;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopSocketTransport;

#[async_trait]
impl SocketTransport for NoopSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pulls envelopes off the transport, acknowledges them and handles each one
/// on its own task so a slow conversation never stalls the others.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    outbox: Arc<Outbox>,
    reconnect_policy: ReconnectPolicy,
    noop_transport: bool,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        outbox: Arc<Outbox>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(dispatcher),
            outbox,
            reconnect_policy,
            noop_transport: false,
        }
    }

    /// Same as [`Self::new`] over the no-op transport, for deployments that
    /// only serve the health endpoint.
    pub fn without_transport(dispatcher: EventDispatcher, outbox: Arc<Outbox>) -> Self {
        Self {
            noop_transport: true,
            ..Self::new(Arc::new(NoopSocketTransport), dispatcher, outbox, ReconnectPolicy::default())
        }
    }

    pub fn is_noop_transport(&self) -> bool {
        self.noop_transport
    }

    pub async fn start(&self) {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => break,
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Waits until every queued reply has been handed to the sink.
    pub async fn drain(&self) {
        self.outbox.flush().await;
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        info!(attempt, "socket mode transport connected");

        let mut in_flight = JoinSet::new();
        let outcome = self.pump(attempt, &mut in_flight).await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                warn!(
                    event_name = "ingress.slack.task_failed",
                    error = %error,
                    "envelope task panicked"
                );
            }
        }
        outcome
    }

    async fn pump(&self, attempt: u32, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let thread_id = thread_id(&envelope);

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                thread_id = thread_id.unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged slack envelope"
                );
            }

            in_flight.spawn(handle_envelope(
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.outbox),
                envelope,
            ));
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(error) = joined {
                    warn!(
                        event_name = "ingress.slack.task_failed",
                        error = %error,
                        "envelope task panicked"
                    );
                }
            }
        }
    }
}

async fn handle_envelope(dispatcher: Arc<EventDispatcher>, outbox: Arc<Outbox>, envelope: SlackEnvelope) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    let Some(target) = envelope.event.reply_target() else {
        debug!(
            event_name = "ingress.slack.unsupported",
            correlation_id = %context.correlation_id,
            "no reply target for event"
        );
        return;
    };

    match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(messages)) => outbox.enqueue(&target, messages),
        Ok(HandlerResult::Ignored) => {}
        Err(error) => {
            warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %context.correlation_id,
                error = %error,
                "event dispatch failed; continuing socket loop"
            );
            outbox.enqueue(
                &target,
                vec![error_message("Sorry, that request could not be handled.", &context.correlation_id)],
            );
        }
    }
}

fn thread_id(envelope: &SlackEnvelope) -> Option<&str> {
    match &envelope.event {
        SlackEvent::ThreadMessage(event) => Some(event.thread_ts.as_str()),
        SlackEvent::SlashCommand(_) | SlackEvent::Unsupported { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use switchboard_agent::runtime::AssistantRuntime;
    use switchboard_core::intent::IntentClassifier;
    use switchboard_core::render::PlatformLimits;
    use switchboard_core::resilience::{HealthRegistry, ServiceProfile, ServiceRegistry};
    use tokio::sync::Mutex;

    use super::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
    use crate::blocks::MessageTemplate;
    use crate::commands::{CommandRouter, SlashCommandPayload};
    use crate::events::{
        assistant_dispatcher, EventDispatcher, ReplyTarget, SlackEnvelope, SlackEvent,
    };
    use crate::outbox::{MessageSink, NoopMessageSink, Outbox, SinkError};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    connect_attempts: 0,
                    acknowledgements: Vec::new(),
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        posted: Mutex<Vec<(ReplyTarget, MessageTemplate)>>,
    }

    #[async_trait]
    impl MessageSink for CollectingSink {
        async fn post(&self, target: &ReplyTarget, message: &MessageTemplate) -> Result<(), SinkError> {
            self.posted.lock().await.push((target.clone(), message.clone()));
            Ok(())
        }
    }

    fn noop_outbox() -> Arc<Outbox> {
        Arc::new(Outbox::new(Arc::new(NoopMessageSink)))
    }

    fn unsupported(id: &str) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(Some(SlackEnvelope {
            envelope_id: id.to_owned(),
            event: SlackEvent::Unsupported { event_type: "test".to_owned() },
        }))
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![unsupported("env-1"), Ok(None)],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            noop_outbox(),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await;

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            noop_outbox(),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await;
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn slash_command_reply_is_posted_to_its_channel() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(SlackEnvelope {
                    envelope_id: "env-7".to_owned(),
                    event: SlackEvent::SlashCommand(SlashCommandPayload {
                        command: "/assistant".to_owned(),
                        text: "help".to_owned(),
                        channel_id: "C42".to_owned(),
                        user_id: "U1".to_owned(),
                        trigger_ts: "1".to_owned(),
                        request_id: "req-7".to_owned(),
                    }),
                })),
                Ok(None),
            ],
        ));
        let sink = Arc::new(CollectingSink::default());
        let runtime =
            Arc::new(AssistantRuntime::new(IntentClassifier::default(), PlatformLimits::default()));
        let health = HealthRegistry::new(Arc::new(ServiceRegistry::new(ServiceProfile::default())));
        let dispatcher =
            assistant_dispatcher(runtime, CommandRouter::new(health, PlatformLimits::default()));

        let runner = SocketModeRunner::new(
            transport,
            dispatcher,
            Arc::new(Outbox::new(sink.clone())),
            ReconnectPolicy::default(),
        );
        runner.start().await;

        let posted = sink.posted.lock().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, ReplyTarget { channel_id: "C42".to_owned(), thread_ts: None });
        assert_eq!(posted[0].1.fallback_text, "Assistant help");
    }

    #[test]
    fn runner_without_transport_reports_noop_mode() {
        assert!(SocketModeRunner::without_transport(EventDispatcher::default(), noop_outbox())
            .is_noop_transport());
    }
}
