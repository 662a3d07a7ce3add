use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchboard_core::config::ResilienceConfig;
use switchboard_core::intent::{Confidence, ConversationState, IntentClassifier, IntentDecision, Route};
use switchboard_core::render::{plan, render, BlockKind, PlatformLimits};
use switchboard_core::resilience::{
    BreakerConfig, CircuitState, ResilientInvoker, RetryPolicy, ServiceProfile, ServiceRegistry,
};
use switchboard_core::{Document, InvokeError, Node, ServiceError};

#[test]
fn search_message_routes_to_notion_handler() {
    let classifier = IntentClassifier::new(vec![Route::new("notion", ["search"])]);

    assert_eq!(
        classifier.classify("search for roadmap", &ConversationState::default()),
        IntentDecision { handler_id: "notion".to_owned(), confidence: Confidence::Certain }
    );
}

#[test]
fn wide_table_collapses_to_one_block_with_omitted_rows() {
    let limits = PlatformLimits { max_table_rows_displayed: 50, ..PlatformLimits::default() };
    let headers = ["keyword", "volume", "trend", "competition", "cpc"]
        .into_iter()
        .map(str::to_owned)
        .collect();
    let rows = (0..200)
        .map(|row| vec![format!("kw{row}"), "9".to_owned(), "up".to_owned(), "low".to_owned(), "1".to_owned()])
        .collect();

    let blocks = render(&Document::new().with(Node::table(headers, rows)), &limits);

    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].kind, BlockKind::Section);
    assert!(blocks[0].text.contains("…150 rows omitted"), "{}", blocks[0].text);
}

#[test]
fn compact_table_threshold_is_inclusive() {
    let limits = PlatformLimits::default();
    assert_eq!(limits.compact_table_column_threshold, 3);
    let table = |columns: usize| {
        let headers: Vec<String> =
            ["alpha", "beta", "gamma", "delta"][..columns].iter().map(|h| (*h).to_owned()).collect();
        let rows = (0..2).map(|row| (0..columns).map(|column| format!("r{row}c{column}")).collect()).collect();
        render(&Document::new().with(Node::table(headers, rows)), &limits)
    };

    let at_threshold = table(3);
    assert_eq!(at_threshold.len(), 1);
    assert_eq!(at_threshold[0].fields.len(), 6);
    assert_eq!(at_threshold[0].fields[2], "*gamma*\nr0c2");

    let above_threshold = table(4);
    assert_eq!(above_threshold.len(), 1);
    assert_eq!(above_threshold[0].kind, BlockKind::Section);
    assert!(above_threshold[0].fields.is_empty());
    assert!(above_threshold[0].text.contains("delta"), "{}", above_threshold[0].text);
    assert!(above_threshold[0].text.contains("r1c3"), "{}", above_threshold[0].text);
}

#[tokio::test(start_paused = true)]
async fn three_transient_failures_open_the_circuit_for_the_next_call() {
    let profile = ServiceProfile::new(
        RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(2)),
        BreakerConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(60) },
        Duration::from_secs(10),
    );
    let invoker = ResilientInvoker::with_seed(Arc::new(ServiceRegistry::new(profile)), 3);
    let calls = AtomicU32::new(0);

    let first: Result<(), _> = invoker
        .invoke("composio", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::transient("503 service unavailable")) }
        })
        .await;
    assert!(matches!(first, Err(InvokeError::RetriesExhausted { attempts: 3, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let second: Result<(), _> = invoker
        .invoke("composio", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    assert_eq!(second, Err(InvokeError::ServiceUnavailable { service: "composio".to_owned() }));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke the action");
    assert_eq!(invoker.health().snapshot()["composio"].state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn recovered_service_closes_after_reset_timeout() {
    let registry = Arc::new(ResilienceConfig::default().registry());
    let invoker = ResilientInvoker::with_seed(registry, 5);

    for _ in 0..3 {
        let _: Result<(), _> =
            invoker.invoke("llm", || async { Err(ServiceError::permanent("bad prompt")) }).await;
    }
    assert_eq!(invoker.health().open_services(), vec!["llm".to_owned()]);

    tokio::time::advance(Duration::from_secs(30)).await;
    let value = invoker.invoke("llm", || async { Ok::<_, ServiceError>("answer") }).await;

    assert_eq!(value, Ok("answer"));
    assert!(invoker.health().is_healthy());
}

#[test]
fn oversized_response_is_planned_into_bounded_batches_with_notice() {
    let limits = PlatformLimits {
        max_blocks_per_message: 5,
        max_blocks_per_response: 12,
        ..PlatformLimits::default()
    };
    let doc: Document = (0..40).map(|index| Node::paragraph(format!("result {index}"))).collect();

    let batches = plan(&render(&doc, &limits), &limits);

    assert_eq!(batches.iter().map(|batch| batch.len()).collect::<Vec<_>>(), vec![5, 5, 2]);
    let notice = &batches[2].blocks[1];
    assert_eq!(notice.kind, BlockKind::Context);
    assert!(notice.text.contains("29 more items omitted"));
}
