//! Serial port supervisor: device discovery and worker lifecycle
//! 串口监督者：设备发现与工作者生命周期
//!
//! The supervisor polls the system for serial devices and keeps one modem
//! worker per known device. Port enumeration sits behind the
//! [`PortScanner`] trait so tests can script which devices exist.
//! 监督者轮询系统中的串口设备，为每个已知设备维持一个调制解调器工作者。
//! 端口枚举位于[`PortScanner`] trait之后，测试可以脚本化设备的存在。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serialport::SerialPortType;
use tracing::{debug, info, warn};

use crate::actor::{ActorRef, Mailbox};
use crate::gateway::delivery::DeliveryQueue;
use crate::gateway::message::Message;
use crate::gateway::modem::ModemDriverFactory;
use crate::gateway::worker::{ModemWorker, WorkerSettings};

/// Poll interval for device discovery / 设备发现的轮询间隔
pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Source of currently present serial devices / 当前存在的串口设备来源
pub trait PortScanner: Send + Sync {
    /// Device paths of candidate modem ports / 候选调制解调器端口的设备路径
    fn scan(&self) -> Vec<String>;
}

/// Real scanner backed by the system port list / 基于系统端口列表的真实扫描器
pub struct SystemPortScanner {
    usb_only: bool,
}

impl SystemPortScanner {
    pub fn new(usb_only: bool) -> Self {
        Self { usb_only }
    }
}

impl PortScanner for SystemPortScanner {
    fn scan(&self) -> Vec<String> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "serial port enumeration failed");
                return Vec::new();
            }
        };
        ports
            .into_iter()
            .filter(|p| match &p.port_type {
                // No hardware descriptor means platform noise, not a modem.
                // 没有硬件描述符意味着平台噪声，不是调制解调器。
                SerialPortType::Unknown => false,
                SerialPortType::UsbPort(_) => true,
                _ => !self.usb_only,
            })
            .map(|p| p.port_name)
            .collect()
    }
}

/// Handle to the running supervisor task / 运行中监督者任务的句柄
pub struct SerialPortSupervisor {
    actor: ActorRef<Message>,
}

impl SerialPortSupervisor {
    pub fn start(
        scanner: Arc<dyn PortScanner>,
        factory: Arc<dyn ModemDriverFactory>,
        manager: ActorRef<Message>,
        delivery: Arc<DeliveryQueue>,
    ) -> Self {
        Self::start_with_settings(
            scanner,
            factory,
            manager,
            delivery,
            SCAN_INTERVAL,
            WorkerSettings::default(),
        )
    }

    pub fn start_with_settings(
        scanner: Arc<dyn PortScanner>,
        factory: Arc<dyn ModemDriverFactory>,
        manager: ActorRef<Message>,
        delivery: Arc<DeliveryQueue>,
        scan_interval: Duration,
        worker_settings: WorkerSettings,
    ) -> Self {
        let (actor, mailbox) = Mailbox::channel("serial-supervisor");
        tokio::spawn(run(
            mailbox,
            scanner,
            factory,
            manager,
            delivery,
            scan_interval,
            worker_settings,
        ));
        Self { actor }
    }

    pub fn actor_ref(&self) -> ActorRef<Message> {
        self.actor.clone()
    }

    /// Ask the supervisor to stop all workers and exit. Does not wait;
    /// worker completion is observed through the SIM manager.
    /// 请求监督者停止所有工作者并退出。不等待；工作者的完成通过SIM管理器
    /// 观察。
    pub fn stop(&self) {
        let _ = self.actor.send(Message::stop());
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut mailbox: Mailbox<Message>,
    scanner: Arc<dyn PortScanner>,
    factory: Arc<dyn ModemDriverFactory>,
    manager: ActorRef<Message>,
    delivery: Arc<DeliveryQueue>,
    scan_interval: Duration,
    worker_settings: WorkerSettings,
) {
    info!("serial port supervisor started");
    let mut workers: HashMap<String, ActorRef<Message>> = HashMap::new();
    let supervisor_ref = mailbox.actor_ref();

    scan_devices(
        &scanner,
        &*factory,
        &manager,
        &supervisor_ref,
        &delivery,
        &worker_settings,
        &mut workers,
    );
    loop {
        match mailbox.recv(Some(scan_interval)).await {
            Message::Timeout => scan_devices(
                &scanner,
                &*factory,
                &manager,
                &supervisor_ref,
                &delivery,
                &worker_settings,
                &mut workers,
            ),
            Message::ShutdownNotification { device } => {
                // The worker gave up its device; a later scan may pick the
                // port up again.
                // 工作者放弃了设备；之后的扫描可能重新拾取该端口。
                info!(device = %device, "worker gone, releasing device");
                workers.remove(&device);
            }
            Message::Stop { .. } => {
                info!(workers = workers.len(), "serial port supervisor stopping");
                for (device, worker) in &workers {
                    if worker.send(Message::stop()).is_err() {
                        debug!(device = %device, "worker already gone on stop");
                    }
                }
                break;
            }
            Message::ChannelClosed => break,
            other => warn!(?other, "unexpected message in supervisor"),
        }
    }
    info!("serial port supervisor stopped");
}

fn scan_devices(
    scanner: &Arc<dyn PortScanner>,
    factory: &dyn ModemDriverFactory,
    manager: &ActorRef<Message>,
    supervisor: &ActorRef<Message>,
    delivery: &Arc<DeliveryQueue>,
    worker_settings: &WorkerSettings,
    workers: &mut HashMap<String, ActorRef<Message>>,
) {
    let present = scanner.scan();
    for device in &present {
        if !workers.contains_key(device) {
            info!(device = %device, "new serial device");
            let worker = ModemWorker::spawn_with_settings(
                device,
                factory,
                manager.clone(),
                supervisor.clone(),
                Arc::clone(delivery),
                worker_settings.clone(),
            );
            workers.insert(device.clone(), worker);
        }
    }
    // A vanished device is only reported; its worker discovers the loss
    // itself through the failing driver session.
    // 消失的设备仅被报告；其工作者会通过失败的驱动会话自行发现丢失。
    for device in workers.keys() {
        if !present.contains(device) {
            debug!(device = %device, "known device not present in scan");
        }
    }
}
