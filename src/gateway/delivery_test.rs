//! Tests for the HTTP delivery queue / HTTP投递队列测试

use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::timeout;

use super::delivery::{DeliveryQueue, DeliverySettings};
use super::error::GatewayError;
use super::test_utils::{capture_server, make_rx, scripted_capture_server};

fn fast_settings() -> DeliverySettings {
    DeliverySettings {
        workers: 2,
        attempts: 3,
        retry_delay_secs: 0,
    }
}

#[tokio::test]
async fn test_delivery_posts_form_fields() {
    let (url, mut received) = capture_server(StatusCode::OK).await;
    let queue = DeliveryQueue::new(fast_settings());

    queue
        .enqueue(make_rx("+49151", "hello there", &url, None))
        .unwrap();

    let form = timeout(Duration::from_secs(2), received.recv())
        .await
        .expect("delivery must arrive")
        .unwrap();
    assert_eq!(form.get("sender").map(String::as_str), Some("+49151"));
    assert_eq!(form.get("recipient").map(String::as_str), Some("+490000"));
    assert_eq!(form.get("text").map(String::as_str), Some("hello there"));
    assert!(form.contains_key("tstamp"));

    queue.stop().await;
    assert_eq!(queue.stats().delivered, 1);
    assert_eq!(queue.stats().dropped, 0);
}

#[tokio::test]
async fn test_rejecting_target_drops_after_attempts() {
    let (url, mut received) = capture_server(StatusCode::INTERNAL_SERVER_ERROR).await;
    let queue = DeliveryQueue::new(fast_settings());

    queue.enqueue(make_rx("+111", "doomed", &url, None)).unwrap();

    // Every attempt reaches the server / 每次尝试都到达服务器
    for _ in 0..3 {
        timeout(Duration::from_secs(2), received.recv())
            .await
            .expect("attempt must arrive")
            .unwrap();
    }

    queue.stop().await;
    assert_eq!(queue.stats().delivered, 0);
    assert_eq!(queue.stats().dropped, 1);
}

#[tokio::test]
async fn test_third_attempt_success_counts_as_delivered() {
    let (url, mut received) = scripted_capture_server(vec![
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::OK,
    ])
    .await;
    let queue = DeliveryQueue::new(fast_settings());

    queue
        .enqueue(make_rx("+111", "persistent", &url, None))
        .unwrap();

    // Two refusals, then the success / 两次拒绝，然后成功
    for _ in 0..3 {
        timeout(Duration::from_secs(2), received.recv())
            .await
            .expect("attempt must arrive")
            .unwrap();
    }

    queue.stop().await;
    assert_eq!(queue.stats().delivered, 1);
    assert_eq!(queue.stats().dropped, 0);
}

#[tokio::test]
async fn test_unreachable_target_drops() {
    // Nothing listens here / 这里没有监听者
    let queue = DeliveryQueue::new(fast_settings());
    queue
        .enqueue(make_rx("+111", "nowhere", "http://127.0.0.1:1/inbound", None))
        .unwrap();

    queue.stop().await;
    assert_eq!(queue.stats().dropped, 1);
}

#[tokio::test]
async fn test_enqueue_after_stop_fails() {
    let queue = DeliveryQueue::new(fast_settings());
    queue.stop().await;

    let err = queue
        .enqueue(make_rx("+111", "late", "http://x/", None))
        .unwrap_err();
    assert!(matches!(err, GatewayError::DeliveryStopped));
}

#[tokio::test]
async fn test_stop_finishes_queued_work() {
    let (url, mut received) = capture_server(StatusCode::OK).await;
    let queue = DeliveryQueue::new(DeliverySettings {
        workers: 1,
        attempts: 1,
        retry_delay_secs: 0,
    });
    for i in 0..5 {
        queue
            .enqueue(make_rx("+111", &format!("msg {i}"), &url, None))
            .unwrap();
    }

    // stop() must not abandon what was accepted / stop()不得丢弃已接受的工作
    queue.stop().await;
    assert_eq!(queue.stats().delivered, 5);
    for _ in 0..5 {
        timeout(Duration::from_secs(1), received.recv())
            .await
            .expect("message must have been posted")
            .unwrap();
    }
}
