//! End-to-end tests over the HTTP boundary / HTTP边界的端到端测试
//!
//! These tests run a real SIM manager over a persisted store and drive it
//! through the axum router, with no modem hardware attached.
//! 这些测试在持久化存储之上运行真实的SIM管理器，并通过axum路由驱动它，
//! 不连接任何调制解调器硬件。

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use tokio::time::timeout;

use msgbox::actor::Mailbox;
use msgbox::gateway::delivery::{DeliveryQueue, DeliverySettings};
use msgbox::gateway::handlers::GatewayState;
use msgbox::gateway::manager::SimManager;
use msgbox::gateway::message::{Message, StatusResponse, WorkerHandle};
use msgbox::gateway::routes::create_routes;
use msgbox::gateway::sim::SimConfigStore;

/// Persist one configured SIM and start the full HTTP + manager stack
/// 持久化一张已配置的SIM并启动完整的HTTP + 管理器栈
fn start_gateway() -> (tempfile::TempDir, SimManager, TestServer) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("msgboxrc");
    std::fs::write(
        &path,
        r#"[{"imsi":"262011234567890","desc":"test sim","phone_number":"+4915112345","url":"http://localhost:1/inbound","active":true}]"#,
    )
    .unwrap();

    let store = SimConfigStore::load(&path).unwrap();
    let manager = SimManager::start(store);
    let state = GatewayState {
        manager: manager.actor_ref(),
        delivery: Arc::new(DeliveryQueue::new(DeliverySettings::default())),
    };
    let server = TestServer::new(create_routes(state)).unwrap();
    (dir, manager, server)
}

#[tokio::test]
async fn test_unknown_sender_is_rejected() {
    let (_dir, _manager, server) = start_gateway();

    let response = server
        .post("/send_sms")
        .form(&[("sender", "+39340000000"), ("receiver", "+222"), ("text", "hi")])
        .await;

    response.assert_status(StatusCode::OK);
    let status: StatusResponse = response.json();
    assert!(status.is_error());
    assert!(status.desc.contains("sim not known"), "desc: {}", status.desc);
}

#[tokio::test]
async fn test_known_sim_without_modem_is_rejected() {
    let (_dir, _manager, server) = start_gateway();

    for form in [
        vec![("sender", "+4915112345"), ("receiver", "+222"), ("text", "hi")],
        vec![("imsi", "262011234567890"), ("receiver", "+222"), ("text", "hi")],
    ] {
        let response = server.post("/send_sms").form(&form).await;
        response.assert_status(StatusCode::OK);
        let status: StatusResponse = response.json();
        assert!(status.is_error());
        assert!(
            status.desc.contains("no active modem"),
            "desc: {}",
            status.desc
        );
    }
}

#[tokio::test]
async fn test_sender_and_imsi_together_rejected_at_the_boundary() {
    let (_dir, _manager, server) = start_gateway();

    let response = server
        .post("/send_sms")
        .form(&[
            ("sender", "+4915112345"),
            ("imsi", "262011234567890"),
            ("receiver", "+222"),
            ("text", "hi"),
        ])
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let status: StatusResponse = response.json();
    assert!(status.is_error());
}

#[tokio::test]
async fn test_send_through_bound_worker_stub() {
    let (_dir, manager, server) = start_gateway();

    // Bind a worker stand-in for the configured sim; it confirms every send.
    // 为已配置的SIM绑定一个工作者替身；它确认每个发送请求。
    let (worker_ref, mut worker_mailbox) = Mailbox::<Message>::channel("stub-worker");
    manager
        .actor_ref()
        .send(Message::ImsiRegister(WorkerHandle {
            actor: worker_ref,
            imsi: "262011234567890".to_string(),
            device: "/dev/ttyUSB0".to_string(),
        }))
        .unwrap();
    let manager_ref = manager.actor_ref();
    let stub = tokio::spawn(async move {
        loop {
            match worker_mailbox.recv(None).await {
                Message::TxSms(req) => {
                    let desc = req.to_string();
                    req.reply.respond(StatusResponse::ok(desc));
                }
                Message::Stop { .. } => {
                    let _ = manager_ref.send(Message::ImsiUnregister(WorkerHandle {
                        actor: worker_mailbox.actor_ref(),
                        imsi: "262011234567890".to_string(),
                        device: "/dev/ttyUSB0".to_string(),
                    }));
                    break;
                }
                _ => {}
            }
        }
    });

    let response = server
        .post("/send_sms")
        .form(&[("sender", "+4915112345"), ("receiver", "+222"), ("text", "hi")])
        .await;

    response.assert_status(StatusCode::OK);
    let status: StatusResponse = response.json();
    assert!(!status.is_error(), "desc: {}", status.desc);

    timeout(Duration::from_secs(2), manager.stop())
        .await
        .expect("manager stop must complete");
    stub.await.unwrap();
}

#[tokio::test]
async fn test_health_reports_counters() {
    let (_dir, _manager, server) = start_gateway();
    let response = server.get("/health").await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
}
