use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::mock::{test_config, MockTransport};
use crate::client::Client;
use crate::config::SenderConfig;
use crate::invoker::{invoke, InvokeError, InvokeOptions};
use crate::limiter::Limiter;
use crate::sender::{MessageSender, OutgoingMessage};
use crate::transport::{Markup, MarkupButton, SendOptions, TransportError};

fn sender_with(mock: &Arc<MockTransport>, config: SenderConfig) -> MessageSender {
    let client = Client::new(mock.clone(), config.max_attempts);
    MessageSender::new(client, config, test_config().limits)
}

fn start(sender: &MessageSender) -> CancellationToken {
    let cancel = CancellationToken::new();
    let worker = sender.clone();
    let token = cancel.clone();
    tokio::spawn(async move { worker.run(token).await });
    cancel
}

async fn wait_for_sends(mock: &MockTransport, count: usize) -> Vec<String> {
    for _ in 0..1000 {
        let sent = mock.sent_texts();
        if sent.len() >= count {
            return sent.into_iter().map(|(_, text)| text).collect();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} sends, got {:?}", count, mock.sent_texts());
}

#[tokio::test(start_paused = true)]
async fn limiter_spaces_out_acquisitions() {
    let limiter = Limiter::new("test", 2, Duration::from_secs(1));
    let start = Instant::now();
    limiter.acquire().await;
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::ZERO);
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn dynamic_limiter_gets_old_when_idle() {
    let limiter = Limiter::new("user_1", 1, Duration::from_secs(1)).dynamic();
    assert!(limiter.is_old().await);
    limiter.acquire().await;
    assert!(!limiter.is_old().await);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(limiter.is_old().await);

    let fixed = Limiter::new("broadcast", 1, Duration::from_secs(1));
    assert!(!fixed.is_old().await);
}

#[tokio::test(start_paused = true)]
async fn retry_after_is_honoured_exactly() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();
    let result = invoke(InvokeOptions::default(), || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            match attempt {
                0 => Err(TransportError::RetryAfter(Duration::from_secs(3))),
                n => Ok(n),
            }
        }
    })
    .await;
    assert_eq!(result.unwrap(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn server_errors_back_off_then_give_up() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();
    let options = InvokeOptions {
        max_attempts: 3,
        ..InvokeOptions::default()
    };
    let result: Result<(), _> = invoke(options, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(TransportError::Server("bad gateway".to_string())) }
    })
    .await;
    match result {
        Err(InvokeError::AttemptLimitReached { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1^4 + 2^4 seconds between the three attempts.
    assert_eq!(start.elapsed(), Duration::from_secs(17));
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = invoke(InvokeOptions::default(), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(TransportError::Blocked("bot was blocked by the user".to_string())) }
    })
    .await;
    assert!(matches!(result, Err(InvokeError::Transport(TransportError::Blocked(_)))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn long_message_parts_arrive_in_order_with_markup_last() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    let cancel = start(&sender);
    // The first part is slow; the second must still wait for it.
    mock.delay_next_send(5, Duration::from_millis(200));

    let markup = Markup::new(vec![vec![MarkupButton::url("docs", "https://example.com")]]);
    let message = OutgoingMessage::new(5, "A".repeat(5000))
        .options(SendOptions::with_markup(Some(markup.clone())));
    let last = sender.send_and_wait(message).await.unwrap().unwrap();

    let sent = mock.sent_texts();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.starts_with("(1/2)\n"));
    assert!(sent[1].1.starts_with("(2/2)\n"));
    assert_eq!(last.id, 2);
    assert_eq!(mock.message(5, 1).unwrap().markup, None);
    assert_eq!(mock.message(5, 2).unwrap().markup, Some(markup));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn same_target_and_priority_keep_submission_order() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    mock.delay_next_send(9, Duration::from_millis(300));
    for text in ["first", "second", "third"] {
        sender.send(OutgoingMessage::new(9, text)).unwrap();
    }
    let cancel = start(&sender);
    assert_eq!(wait_for_sends(&mock, 3).await, ["first", "second", "third"]);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn urgent_priority_is_sent_first_when_queued_first() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    sender.send(OutgoingMessage::new(3, "high").priority(1)).unwrap();
    sender.send(OutgoingMessage::new(3, "low").priority(2)).unwrap();
    let cancel = start(&sender);
    assert_eq!(wait_for_sends(&mock, 2).await, ["high", "low"]);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn urgent_priority_is_sent_first_when_queued_second() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    sender.send(OutgoingMessage::new(3, "low").priority(2)).unwrap();
    sender.send(OutgoingMessage::new(3, "high").priority(1)).unwrap();
    let cancel = start(&sender);
    assert_eq!(wait_for_sends(&mock, 2).await, ["high", "low"]);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn chains_do_not_cross_priorities() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    let cancel = start(&sender);
    mock.delay_next_send(3, Duration::from_secs(1));
    sender.send(OutgoingMessage::new(3, "low").priority(2)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // "low" is already on the wire; "high" does not queue behind it.
    sender.send(OutgoingMessage::new(3, "high").priority(1)).unwrap();
    assert_eq!(wait_for_sends(&mock, 2).await, ["high", "low"]);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn per_priority_cap_holds_back_the_tier() {
    let mock = MockTransport::new();
    let config = SenderConfig {
        per_priority_limit: 1,
        ..SenderConfig::default()
    };
    let sender = sender_with(&mock, config);
    mock.delay_next_send(1, Duration::from_millis(500));
    sender.send(OutgoingMessage::new(1, "slow").priority(2)).unwrap();
    sender.send(OutgoingMessage::new(2, "capped").priority(2)).unwrap();
    sender.send(OutgoingMessage::new(3, "urgent").priority(1)).unwrap();
    let cancel = start(&sender);
    assert_eq!(wait_for_sends(&mock, 3).await, ["urgent", "slow", "capped"]);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn rate_limited_send_is_retried() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    let cancel = start(&sender);
    mock.fail_send(TransportError::RetryAfter(Duration::from_secs(2)));
    let begin = Instant::now();
    let sent = sender
        .send_and_wait(OutgoingMessage::new(4, "hello"))
        .await
        .unwrap();
    assert!(sent.is_some());
    assert!(begin.elapsed() >= Duration::from_secs(2));
    assert_eq!(mock.sent_texts(), [(4, "hello".to_string())]);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn ignored_failures_resolve_without_a_message() {
    let mock = MockTransport::new();
    let sender = sender_with(&mock, SenderConfig::default());
    let cancel = start(&sender);

    mock.fail_send(TransportError::Blocked("bot was blocked by the user".to_string()));
    let options = SendOptions {
        ignore_errors: true,
        ..SendOptions::default()
    };
    let result = sender
        .send_and_wait(OutgoingMessage::new(4, "hi").options(options))
        .await;
    assert!(matches!(result, Ok(None)));

    mock.fail_send(TransportError::Blocked("bot was blocked by the user".to_string()));
    let result = sender.send_and_wait(OutgoingMessage::new(4, "hi")).await;
    assert!(result.is_err());
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancellation_fails_pending_deliveries() {
    let mock = MockTransport::new();
    let config = SenderConfig {
        per_priority_limit: 1,
        ..SenderConfig::default()
    };
    let sender = sender_with(&mock, config);
    mock.delay_next_send(1, Duration::from_secs(60));
    let in_flight = sender
        .send(OutgoingMessage::new(1, "stuck").blocking())
        .unwrap()
        .unwrap();
    let queued = sender
        .send(OutgoingMessage::new(2, "waiting").blocking())
        .unwrap()
        .unwrap();
    let cancel = start(&sender);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sender.pending(), 1);
    cancel.cancel();

    for delivery in [in_flight, queued] {
        let err = delivery.wait().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<InvokeError>(), Some(InvokeError::Cancelled)));
    }
    assert!(mock.sent_texts().is_empty());
}
