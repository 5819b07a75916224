//! Tests for the serial port supervisor / 串口监督者测试

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::actor::Mailbox;

use super::delivery::{DeliveryQueue, DeliverySettings};
use super::message::{Message, MessageKind, WorkerHandle};
use super::supervisor::SerialPortSupervisor;
use super::test_utils::{startable_config, MockModemFactory, MockScanner};
use super::worker::WorkerSettings;

fn fast_worker_settings() -> WorkerSettings {
    WorkerSettings {
        connect_backoff: Duration::from_millis(50),
        network_ttl: Duration::from_millis(200),
        network_probe_timeout: Duration::from_millis(50),
        work_poll: Duration::from_millis(50),
        waiting_poll: Duration::from_millis(200),
    }
}

struct Fixture {
    scanner: Arc<MockScanner>,
    manager: Mailbox<Message>,
    supervisor: SerialPortSupervisor,
}

fn start_fixture(devices: &[&str]) -> Fixture {
    let scanner = MockScanner::with_devices(devices);
    let factory = Arc::new(MockModemFactory::new());
    let (manager_ref, manager) = Mailbox::channel("fake-manager");
    let delivery = Arc::new(DeliveryQueue::new(DeliverySettings {
        workers: 1,
        attempts: 1,
        retry_delay_secs: 0,
    }));
    let supervisor = SerialPortSupervisor::start_with_settings(
        scanner.clone(),
        factory,
        manager_ref,
        delivery,
        Duration::from_millis(50),
        fast_worker_settings(),
    );
    Fixture {
        scanner,
        manager,
        supervisor,
    }
}

async fn expect_claim(fixture: &mut Fixture) -> WorkerHandle {
    match timeout(
        Duration::from_secs(2),
        fixture
            .manager
            .recv_only(MessageKind::ImsiRegister, Some(Duration::from_secs(2))),
    )
    .await
    .expect("claim must arrive")
    {
        Message::ImsiRegister(handle) => handle,
        other => panic!("expected registration claim, got {other:?}"),
    }
}

#[tokio::test]
async fn test_one_worker_per_discovered_device() {
    let mut fixture = start_fixture(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);

    let first = expect_claim(&mut fixture).await;
    let second = expect_claim(&mut fixture).await;
    let mut devices = vec![first.device, second.device];
    devices.sort();
    assert_eq!(devices, vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]);

    fixture.supervisor.stop();
}

#[tokio::test]
async fn test_rescan_picks_up_new_device() {
    let mut fixture = start_fixture(&[]);

    // Nothing present, nothing spawned / 没有设备，不启动任何工作者
    assert!(matches!(
        fixture.manager.recv(Some(Duration::from_millis(200))).await,
        Message::Timeout
    ));

    fixture
        .scanner
        .devices
        .lock()
        .push("/dev/ttyACM3".to_string());
    let handle = expect_claim(&mut fixture).await;
    assert_eq!(handle.device, "/dev/ttyACM3");

    fixture.supervisor.stop();
}

#[tokio::test]
async fn test_shutdown_notification_releases_the_device() {
    let mut fixture = start_fixture(&["/dev/ttyUSB0"]);
    let first = expect_claim(&mut fixture).await;

    fixture
        .supervisor
        .actor_ref()
        .send(Message::ShutdownNotification {
            device: "/dev/ttyUSB0".to_string(),
        })
        .unwrap();

    // The still-present device gets a fresh worker on the next scan
    // 仍然存在的设备会在下一次扫描时得到新的工作者
    let second = expect_claim(&mut fixture).await;
    assert_eq!(second.device, "/dev/ttyUSB0");
    assert_ne!(first.actor, second.actor);

    fixture.supervisor.stop();
}

#[tokio::test]
async fn test_stop_propagates_to_workers() {
    let mut fixture = start_fixture(&["/dev/ttyUSB0"]);
    let handle = expect_claim(&mut fixture).await;

    // Move the worker into its serving state / 让工作者进入服务状态
    handle
        .actor
        .send(Message::ImsiRegistration {
            success: true,
            config: Some(startable_config(&handle.imsi, "+490000", "http://x/")),
        })
        .unwrap();

    fixture.supervisor.stop();

    // The stopping worker gives its sim back / 正在停止的工作者交还其SIM
    match timeout(
        Duration::from_secs(2),
        fixture
            .manager
            .recv_only(MessageKind::ImsiUnregister, Some(Duration::from_secs(2))),
    )
    .await
    .expect("unregister must arrive")
    {
        Message::ImsiUnregister(released) => assert_eq!(released.device, "/dev/ttyUSB0"),
        other => panic!("expected unregister, got {other:?}"),
    }
}
