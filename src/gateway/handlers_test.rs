//! Tests for the HTTP boundary / HTTP边界测试

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;

use crate::actor::Mailbox;

use super::delivery::{DeliveryQueue, DeliverySettings};
use super::handlers::GatewayState;
use super::message::{Message, StatusResponse};
use super::routes::create_routes;

/// A server whose manager stand-in answers every send request with OK
/// 管理器替身对每个发送请求以OK答复的服务器
fn test_server_with_echo_manager() -> TestServer {
    let (manager_ref, mut mailbox) = Mailbox::<Message>::channel("fake-manager");
    tokio::spawn(async move {
        loop {
            match mailbox.recv(None).await {
                Message::TxSms(req) => {
                    let desc = req.to_string();
                    req.reply.respond(StatusResponse::ok(desc));
                }
                Message::ChannelClosed => break,
                _ => {}
            }
        }
    });
    let state = GatewayState {
        manager: manager_ref,
        delivery: Arc::new(DeliveryQueue::new(DeliverySettings::default())),
    };
    TestServer::new(create_routes(state)).expect("test server")
}

#[tokio::test]
async fn test_send_sms_with_sender() {
    let server = test_server_with_echo_manager();
    let response = server
        .post("/send_sms")
        .form(&[
            ("sender", "+111"),
            ("receiver", "+222"),
            ("text", "hello"),
        ])
        .await;

    response.assert_status(StatusCode::OK);
    let status: StatusResponse = response.json();
    assert!(!status.is_error(), "desc: {}", status.desc);
    assert!(status.desc.contains("+222"), "desc: {}", status.desc);
}

#[tokio::test]
async fn test_send_sms_with_imsi() {
    let server = test_server_with_echo_manager();
    let response = server
        .post("/send_sms")
        .form(&[
            ("imsi", "262011234567890"),
            ("receiver", "+222"),
            ("text", "hello"),
        ])
        .await;

    response.assert_status(StatusCode::OK);
    let status: StatusResponse = response.json();
    assert!(!status.is_error());
}

#[tokio::test]
async fn test_sender_and_imsi_together_is_bad_request() {
    let server = test_server_with_echo_manager();
    let response = server
        .post("/send_sms")
        .form(&[
            ("sender", "+111"),
            ("imsi", "262011234567890"),
            ("receiver", "+222"),
            ("text", "hello"),
        ])
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let status: StatusResponse = response.json();
    assert!(status.is_error());
    assert!(
        status.desc.contains("mutually exclusive"),
        "desc: {}",
        status.desc
    );
}

#[tokio::test]
async fn test_neither_sender_nor_imsi_is_bad_request() {
    let server = test_server_with_echo_manager();
    let response = server
        .post("/send_sms")
        .form(&[("receiver", "+222"), ("text", "hello")])
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let status: StatusResponse = response.json();
    assert!(status.is_error());
}

#[tokio::test]
async fn test_send_sms_when_manager_is_gone() {
    let (manager_ref, mailbox) = Mailbox::<Message>::channel("dead-manager");
    mailbox.close_channel();
    drop(mailbox);
    let state = GatewayState {
        manager: manager_ref,
        delivery: Arc::new(DeliveryQueue::new(DeliverySettings::default())),
    };
    let server = TestServer::new(create_routes(state)).expect("test server");

    let response = server
        .post("/send_sms")
        .form(&[("sender", "+111"), ("receiver", "+222"), ("text", "x")])
        .await;

    response.assert_status(StatusCode::OK);
    let status: StatusResponse = response.json();
    assert!(status.is_error());
    assert!(
        status.desc.contains("shutting down"),
        "desc: {}",
        status.desc
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = test_server_with_echo_manager();
    let response = server.get("/health").await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["delivered"], 0);
    assert_eq!(body["dropped"], 0);
}
