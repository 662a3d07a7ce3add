use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blocks::MessageTemplate;
use crate::events::ReplyTarget;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("message post failed: {0}")]
    Post(String),
}

/// Destination of outbound messages, e.g. the chat platform's web API.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn post(&self, target: &ReplyTarget, message: &MessageTemplate) -> Result<(), SinkError>;
}

#[derive(Default)]
pub struct NoopMessageSink;

#[async_trait]
impl MessageSink for NoopMessageSink {
    async fn post(&self, target: &ReplyTarget, message: &MessageTemplate) -> Result<(), SinkError> {
        debug!(
            event_name = "egress.slack.noop_post",
            channel_id = %target.channel_id,
            blocks = message.blocks.len(),
            "dropping outbound message"
        );
        Ok(())
    }
}

/// How long a conversation's writer waits for more messages before it exits.
pub const DEFAULT_WRITER_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

type WriterMap = Arc<Mutex<HashMap<String, Writer>>>;

struct Writer {
    id: u64,
    sender: mpsc::UnboundedSender<MessageTemplate>,
    task: JoinHandle<()>,
}

/// Serializes posts per conversation: each conversation gets one writer task,
/// so messages enqueued for it are posted in enqueue order while different
/// conversations post concurrently. Writers retire after sitting idle and
/// are respawned by the next enqueue.
pub struct Outbox {
    sink: Arc<dyn MessageSink>,
    writers: WriterMap,
    next_writer_id: AtomicU64,
    idle_timeout: Duration,
}

impl Outbox {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            writers: Arc::new(Mutex::new(HashMap::new())),
            next_writer_id: AtomicU64::new(0),
            idle_timeout: DEFAULT_WRITER_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queues `messages` behind anything already pending for `target`.
    pub fn enqueue(&self, target: &ReplyTarget, messages: Vec<MessageTemplate>) {
        let key = target.conversation_key();
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        for message in messages {
            let writer = writers
                .entry(key.clone())
                .or_insert_with(|| self.spawn_writer(key.clone(), target.clone()));
            let Err(mpsc::error::SendError(message)) = writer.sender.send(message) else {
                continue;
            };

            // The previous writer died; its replacement takes over the queue.
            let replacement = self.spawn_writer(key.clone(), target.clone());
            if replacement.sender.send(message).is_err() {
                warn!(
                    event_name = "egress.slack.enqueue_failed",
                    conversation = %key,
                    "outbox writer unavailable"
                );
            }
            writers.insert(key.clone(), replacement);
        }
    }

    pub fn open_conversations(&self) -> usize {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Closes every queue and waits until all pending messages are posted.
    pub async fn flush(&self) {
        let writers: Vec<Writer> = self
            .writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, writer)| writer)
            .collect();

        for Writer { sender, task, .. } in writers {
            drop(sender);
            if let Err(error) = task.await {
                warn!(event_name = "egress.slack.writer_failed", error = %error, "outbox writer panicked");
            }
        }
    }

    fn spawn_writer(&self, key: String, target: ReplyTarget) -> Writer {
        let id = self.next_writer_id.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<MessageTemplate>();
        let sink = Arc::clone(&self.sink);
        let writers = Arc::clone(&self.writers);
        let idle_timeout = self.idle_timeout;

        let task = tokio::spawn(async move {
            loop {
                let message = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(_) => match retire_if_idle(&writers, &key, id, &mut receiver) {
                        Some(message) => message,
                        None => break,
                    },
                };

                if let Err(error) = sink.post(&target, &message).await {
                    warn!(
                        event_name = "egress.slack.post_failed",
                        channel_id = %target.channel_id,
                        thread_ts = target.thread_ts.as_deref().unwrap_or("none"),
                        error = %error,
                        "failed to post message; continuing with the next one"
                    );
                }
            }
        });
        Writer { id, sender, task }
    }
}

/// Removes an idle writer from the map. Enqueue sends while holding the map
/// lock, so a message that raced the timeout is either already in the
/// channel, and is returned, or goes to a fresh writer.
fn retire_if_idle(
    writers: &Mutex<HashMap<String, Writer>>,
    key: &str,
    id: u64,
    receiver: &mut mpsc::UnboundedReceiver<MessageTemplate>,
) -> Option<MessageTemplate> {
    let mut writers = writers.lock().unwrap_or_else(PoisonError::into_inner);
    if let Ok(message) = receiver.try_recv() {
        return Some(message);
    }
    if writers.get(key).is_some_and(|writer| writer.id == id) {
        writers.remove(key);
        debug!(event_name = "egress.slack.writer_retired", conversation = %key, "idle outbox writer retired");
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{MessageSink, Outbox, SinkError};
    use crate::blocks::{MessageBuilder, MessageTemplate};
    use crate::events::ReplyTarget;

    #[derive(Default)]
    struct RecordingSink {
        posted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn post(&self, target: &ReplyTarget, message: &MessageTemplate) -> Result<(), SinkError> {
            // First message of every thread is slow, later ones must still wait for it.
            if message.fallback_text.ends_with("-0") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if message.fallback_text == "fail" {
                return Err(SinkError::Post("channel_not_found".to_owned()));
            }
            self.posted
                .lock()
                .expect("posted lock")
                .push((target.conversation_key(), message.fallback_text.clone()));
            Ok(())
        }
    }

    fn target(thread: &str) -> ReplyTarget {
        ReplyTarget { channel_id: "C1".to_owned(), thread_ts: Some(thread.to_owned()) }
    }

    fn messages(prefix: &str, count: usize) -> Vec<MessageTemplate> {
        (0..count).map(|index| MessageBuilder::new(format!("{prefix}-{index}")).build()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn posts_in_enqueue_order_per_conversation() {
        let sink = Arc::new(RecordingSink::default());
        let outbox = Outbox::new(sink.clone());

        outbox.enqueue(&target("T1"), messages("a", 3));
        outbox.enqueue(&target("T2"), messages("b", 2));
        outbox.enqueue(&target("T1"), messages("c", 1));
        assert_eq!(outbox.open_conversations(), 2);
        outbox.flush().await;

        let posted = sink.posted.lock().expect("posted lock");
        let thread = |key: &str| -> Vec<String> {
            posted.iter().filter(|(k, _)| k == key).map(|(_, text)| text.clone()).collect()
        };
        assert_eq!(thread("C1:T1"), vec!["a-0", "a-1", "a-2", "c-0"]);
        assert_eq!(thread("C1:T2"), vec!["b-0", "b-1"]);
        assert_eq!(outbox.open_conversations(), 0);
    }

    #[tokio::test]
    async fn failed_post_does_not_block_later_messages() {
        let sink = Arc::new(RecordingSink::default());
        let outbox = Outbox::new(sink.clone());

        outbox.enqueue(
            &target("T1"),
            vec![MessageBuilder::new("fail").build(), MessageBuilder::new("next").build()],
        );
        outbox.flush().await;

        let posted = sink.posted.lock().expect("posted lock");
        assert_eq!(posted.as_slice(), [("C1:T1".to_owned(), "next".to_owned())]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_writers_retire_and_respawn_on_demand() {
        let sink = Arc::new(RecordingSink::default());
        let outbox = Outbox::new(sink.clone()).with_idle_timeout(Duration::from_secs(60));

        for thread in 0..200 {
            outbox.enqueue(&target(&format!("T{thread}")), messages("m", 1));
        }
        assert_eq!(outbox.open_conversations(), 200);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(outbox.open_conversations(), 0);
        assert_eq!(sink.posted.lock().expect("posted lock").len(), 200);

        outbox.enqueue(&target("T7"), messages("again", 2));
        assert_eq!(outbox.open_conversations(), 1);
        outbox.flush().await;

        let posted = sink.posted.lock().expect("posted lock");
        let thread: Vec<&str> = posted
            .iter()
            .filter(|(key, _)| key == "C1:T7")
            .map(|(_, text)| text.as_str())
            .collect();
        assert_eq!(thread, ["m-0", "again-0", "again-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_writer_outlives_the_idle_timeout() {
        let sink = Arc::new(RecordingSink::default());
        let outbox = Outbox::new(sink.clone()).with_idle_timeout(Duration::from_secs(10));

        for round in 0..3 {
            outbox.enqueue(&target("T1"), vec![MessageBuilder::new(format!("r{round}")).build()]);
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert_eq!(outbox.open_conversations(), 1);
        }
        outbox.flush().await;

        assert_eq!(sink.posted.lock().expect("posted lock").len(), 3);
    }
}
