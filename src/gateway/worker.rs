//! Modem worker actor: one finite state machine per serial device
//! 调制解调器工作者actor：每个串口设备一个有限状态机
//!
//! The worker owns a modem driver session for exactly one device. Its whole
//! life is a state machine: connect to the hardware, claim the SIM identity
//! at the manager, then either serve traffic or wait until the SIM
//! configuration makes it startable. Every state change funnels through one
//! `transition` point so the log carries the full history of the device.
//! 工作者独占一个设备的调制解调器驱动会话。它的整个生命周期是一个状态机：
//! 连接硬件、向管理器声明SIM标识，然后要么处理流量，要么等待SIM配置变为
//! 可启动。所有状态变更都经过唯一的`transition`点，因此日志承载了设备的
//! 完整历史。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::actor::{ActorRef, Mailbox};
use crate::gateway::concat::ConcatPool;
use crate::gateway::delivery::DeliveryQueue;
use crate::gateway::message::{
    Message, MessageKind, RxSmsRequest, StatusResponse, TxSmsRequest, WorkerHandle,
};
use crate::gateway::modem::{IncomingSms, ModemDriver, ModemDriverFactory, SmsHook};
use crate::gateway::sim::SimConfig;

/// The states a modem worker moves through / 调制解调器工作者经历的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Establishing the hardware session / 建立硬件会话
    Connecting,
    /// Claiming the SIM identity at the manager / 向管理器声明SIM标识
    Registering,
    /// Bound, but the SIM config is not startable yet / 已绑定但SIM配置尚不可启动
    Waiting,
    /// Registration denied; parked until stopped / 注册被拒绝；停机直到被停止
    Deactivated,
    /// Serving traffic / 处理流量
    Working,
    /// Orderly teardown / 有序拆除
    ShuttingDown,
}

/// Outcome of one state body / 一个状态体的结果
enum Step {
    Goto(WorkerState),
    Exit,
}

/// Worker timing knobs, overridable by tests / 工作者时序参数，测试可覆盖
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Pause between failed connect attempts / 连接失败后的重试间隔
    pub connect_backoff: Duration,
    /// How long a positive network probe stays trusted / 网络探测阳性结果的可信时长
    pub network_ttl: Duration,
    /// Deadline for one network probe / 单次网络探测的期限
    pub network_probe_timeout: Duration,
    /// Receive timeout while working; refreshes the network cache
    /// 工作状态的接收超时；用于刷新网络缓存
    pub work_poll: Duration,
    /// Receive timeout while waiting; triggers re-registration
    /// 等待状态的接收超时；触发重注册
    pub waiting_poll: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            connect_backoff: Duration::from_secs(50),
            network_ttl: Duration::from_secs(30),
            network_probe_timeout: Duration::from_secs(3),
            work_poll: Duration::from_secs(5),
            waiting_poll: Duration::from_secs(30),
        }
    }
}

pub struct ModemWorker {
    device: String,
    driver: Arc<dyn ModemDriver>,
    manager: ActorRef<Message>,
    supervisor: ActorRef<Message>,
    mailbox: Mailbox<Message>,
    concat: ConcatPool,
    delivery: Arc<DeliveryQueue>,
    settings: WorkerSettings,
    /// Set once the hardware identity has been read / 读取硬件标识后设置
    imsi: Option<String>,
    /// The current config snapshot, present from successful registration on
    /// 当前配置快照，注册成功后存在
    config: Option<SimConfig>,
    registered: bool,
    /// Last measured network availability and its expiry
    /// 最近一次网络可用性测量结果及其过期时间
    network_probe: Option<(bool, Instant)>,
}

impl ModemWorker {
    /// Spawn a worker task for `device` and return its mailbox handle
    /// 为`device`启动一个工作者任务并返回其邮箱句柄
    pub fn spawn(
        device: &str,
        factory: &dyn ModemDriverFactory,
        manager: ActorRef<Message>,
        supervisor: ActorRef<Message>,
        delivery: Arc<DeliveryQueue>,
    ) -> ActorRef<Message> {
        Self::spawn_with_settings(
            device,
            factory,
            manager,
            supervisor,
            delivery,
            WorkerSettings::default(),
        )
    }

    pub fn spawn_with_settings(
        device: &str,
        factory: &dyn ModemDriverFactory,
        manager: ActorRef<Message>,
        supervisor: ActorRef<Message>,
        delivery: Arc<DeliveryQueue>,
        settings: WorkerSettings,
    ) -> ActorRef<Message> {
        let (actor, mailbox) = Mailbox::channel(format!("modem-{device}"));

        // The driver reports inbound SMS through this hook; it re-enters the
        // mailbox so reassembly and forwarding happen on the worker task.
        // 驱动通过此回调报告入站短信；它重新进入邮箱，使重组和转发在
        // 工作者任务上进行。
        let hook: SmsHook = {
            let actor = actor.clone();
            let device = device.to_string();
            Arc::new(move |sms: IncomingSms| {
                let rx = RxSmsRequest {
                    sender_number: sms.sender,
                    recipient_number: String::new(),
                    text: sms.text,
                    timestamp: sms.timestamp,
                    destination_url: String::new(),
                    concat_info: sms.concat,
                };
                if actor.send(Message::RxSms(rx)).is_err() {
                    warn!(device = %device, "inbound sms dropped, worker is gone");
                }
            })
        };
        let driver = factory.build(device, hook);
        let concat = ConcatPool::new(actor.clone());

        let worker = ModemWorker {
            device: device.to_string(),
            driver,
            manager,
            supervisor,
            mailbox,
            concat,
            delivery,
            settings,
            imsi: None,
            config: None,
            registered: false,
            network_probe: None,
        };
        tokio::spawn(worker.run());
        actor
    }

    async fn run(mut self) {
        info!(device = %self.device, "modem worker started");
        let mut state = WorkerState::Connecting;
        loop {
            let step = match state {
                WorkerState::Connecting => self.connect().await,
                WorkerState::Registering => self.register().await,
                WorkerState::Waiting => self.wait_for_config().await,
                WorkerState::Deactivated => self.deactivated().await,
                WorkerState::Working => self.work().await,
                WorkerState::ShuttingDown => {
                    self.shutdown().await;
                    break;
                }
            };
            match step {
                Step::Goto(next) => state = self.transition(state, next),
                Step::Exit => break,
            }
        }
    }

    /// The single point every state change goes through
    /// 所有状态变更经过的唯一入口
    fn transition(&self, from: WorkerState, to: WorkerState) -> WorkerState {
        if from != to {
            info!(device = %self.device, from = ?from, to = ?to, "worker state change");
        }
        to
    }

    async fn connect(&mut self) -> Step {
        match self.driver.connect().await {
            Ok(identity) => {
                info!(
                    device = %self.device,
                    imsi = %identity.imsi,
                    manufacturer = %identity.info.manufacturer,
                    model = %identity.info.model,
                    network = %identity.info.network,
                    signal = %identity.info.signal,
                    "modem connected"
                );
                self.imsi = Some(identity.imsi);
                Step::Goto(WorkerState::Registering)
            }
            Err(e) => {
                warn!(device = %self.device, error = %e, "modem connect failed");
                if let Err(e) = self.driver.close().await {
                    debug!(device = %self.device, error = %e, "close after failed connect");
                }
                // Sit out the backoff window unless a stop arrives first.
                // 在退避窗口内等待，除非先收到停止指令。
                match self
                    .mailbox
                    .recv_only(MessageKind::Stop, Some(self.settings.connect_backoff))
                    .await
                {
                    Message::Stop { .. } => Step::Goto(WorkerState::ShuttingDown),
                    _ => Step::Goto(WorkerState::Connecting),
                }
            }
        }
    }

    async fn register(&mut self) -> Step {
        let Some(imsi) = self.imsi.clone() else {
            error!(device = %self.device, "registering without an identity");
            return Step::Goto(WorkerState::ShuttingDown);
        };
        let handle = WorkerHandle {
            actor: self.mailbox.actor_ref(),
            imsi,
            device: self.device.clone(),
        };
        if self.manager.send(Message::ImsiRegister(handle)).is_err() {
            warn!(device = %self.device, "sim manager unreachable, shutting down");
            return Step::Goto(WorkerState::ShuttingDown);
        }
        match self
            .mailbox
            .recv_only(MessageKind::ImsiRegistration, None)
            .await
        {
            Message::ImsiRegistration {
                success: true,
                config: Some(config),
            } => {
                self.registered = true;
                let startable = config.is_startable();
                self.config = Some(config);
                if startable {
                    Step::Goto(WorkerState::Working)
                } else {
                    Step::Goto(WorkerState::Waiting)
                }
            }
            Message::ImsiRegistration { .. } => {
                warn!(device = %self.device, "sim registration denied");
                Step::Goto(WorkerState::Deactivated)
            }
            other => {
                warn!(device = %self.device, ?other, "unexpected reply to registration");
                Step::Goto(WorkerState::ShuttingDown)
            }
        }
    }

    async fn wait_for_config(&mut self) -> Step {
        match self.mailbox.recv(Some(self.settings.waiting_poll)).await {
            Message::Stop { .. } => Step::Goto(WorkerState::ShuttingDown),
            // Periodic re-registration keeps the binding fresh.
            // 周期性重注册保持绑定新鲜。
            Message::Timeout => Step::Goto(WorkerState::Registering),
            Message::SimConfigChanged(config) => {
                // Any config change routes into the serving state; the send
                // path gates on `active` itself.
                // 任何配置变更都进入服务状态；发送路径自行以`active`把关。
                self.config = Some(config);
                Step::Goto(WorkerState::Working)
            }
            Message::TxSms(req) => {
                req.reply
                    .respond(StatusResponse::error("modem is not active"));
                Step::Goto(WorkerState::Waiting)
            }
            Message::RxSms(rx) => {
                // The SIM has no delivery target yet; nowhere to put this.
                // SIM还没有投递目标；此消息无处可去。
                warn!(
                    device = %self.device,
                    sender = %rx.sender_number,
                    "received sms dropped, sim not configured"
                );
                Step::Goto(WorkerState::Waiting)
            }
            Message::ChannelClosed => Step::Exit,
            other => {
                debug!(device = %self.device, ?other, "message ignored while waiting");
                Step::Goto(WorkerState::Waiting)
            }
        }
    }

    async fn deactivated(&mut self) -> Step {
        info!(device = %self.device, "worker deactivated, sim owned elsewhere");
        if let Err(e) = self.driver.close().await {
            warn!(device = %self.device, error = %e, "modem close failed");
        }
        match self.mailbox.recv_only(MessageKind::Stop, None).await {
            Message::Stop { .. } => Step::Goto(WorkerState::ShuttingDown),
            _ => Step::Goto(WorkerState::ShuttingDown),
        }
    }

    async fn work(&mut self) -> Step {
        // Messages stored on the SIM while nobody was serving it come first.
        // 首先处理无人服务期间存储在SIM上的消息。
        if let Err(e) = self.driver.drain_stored_sms().await {
            error!(device = %self.device, error = %e, "cannot drain stored sms, giving up device");
            let _ = self.supervisor.send(Message::ShutdownNotification {
                device: self.device.clone(),
            });
            return Step::Goto(WorkerState::ShuttingDown);
        }

        loop {
            match self.mailbox.recv(Some(self.settings.work_poll)).await {
                Message::Stop { .. } => return Step::Goto(WorkerState::ShuttingDown),
                Message::Timeout => {
                    // Keep the availability cache warm between requests.
                    // 在请求之间保持可用性缓存的新鲜度。
                    self.network_available().await;
                }
                Message::TxSms(req) => self.handle_tx(req).await,
                Message::RxSms(rx) => self.handle_rx(rx),
                Message::SimConfigChanged(config) => {
                    info!(device = %self.device, imsi = %config.imsi, "sim config refreshed");
                    self.config = Some(config);
                }
                Message::ImsiRegistration { .. } => {
                    debug!(device = %self.device, "duplicate registration verdict ignored");
                }
                Message::ChannelClosed => {
                    warn!(device = %self.device, "mailbox closed unexpectedly");
                    return Step::Goto(WorkerState::ShuttingDown);
                }
                other => {
                    warn!(device = %self.device, ?other, "unexpected message while working");
                }
            }
        }
    }

    async fn handle_tx(&mut self, req: TxSmsRequest) {
        let active = self.config.as_ref().map(|c| c.active).unwrap_or(false);
        if !active {
            req.reply
                .respond(StatusResponse::error("modem is not active"));
            return;
        }
        if !self.network_available().await {
            req.reply
                .respond(StatusResponse::error("no network coverage"));
            return;
        }
        let desc = req.to_string();
        match self.driver.send_sms(&req.recipient, &req.text).await {
            Ok(()) => req.reply.respond(StatusResponse::ok(desc)),
            Err(e) => {
                // A failed send may mean the network went away mid-flight.
                // 发送失败可能意味着网络在途中消失。
                self.network_probe = None;
                req.reply.respond(StatusResponse::error(e.to_string()));
            }
        }
    }

    /// Check network coverage, trusting a recent measurement of either
    /// polarity. The probe blocks the worker, so a known-dead network must
    /// not be re-probed for every queued request.
    /// 检查网络覆盖，信任近期任一极性的测量结果。探测会阻塞工作者，
    /// 因此已知不可用的网络不能为每个排队请求重新探测。
    async fn network_available(&mut self) -> bool {
        if let Some((ok, until)) = self.network_probe {
            if Instant::now() < until {
                return ok;
            }
        }
        let ok = match self
            .driver
            .wait_for_network_coverage(self.settings.network_probe_timeout)
            .await
        {
            Ok(signal) => {
                debug!(device = %self.device, signal, "network coverage confirmed");
                true
            }
            Err(e) => {
                debug!(device = %self.device, error = %e, "no network coverage");
                false
            }
        };
        self.network_probe = Some((ok, Instant::now() + self.settings.network_ttl));
        ok
    }

    fn handle_rx(&mut self, mut rx: RxSmsRequest) {
        let Some(config) = self.config.as_ref() else {
            warn!(device = %self.device, "received sms without a sim config, dropped");
            return;
        };
        // Raw driver messages know nothing about the receiving SIM.
        // 驱动的原始消息对接收SIM一无所知。
        if rx.recipient_number.is_empty() {
            rx.recipient_number = config.phone_number.clone().unwrap_or_default();
            rx.destination_url = config.url.clone().unwrap_or_default();
        }
        if rx.destination_url.is_empty() {
            warn!(
                device = %self.device,
                sender = %rx.sender_number,
                "received sms dropped, sim has no delivery url"
            );
            return;
        }
        if let Some(merged) = self.concat.merge(rx) {
            if let Err(e) = self.delivery.enqueue(merged) {
                warn!(device = %self.device, error = %e, "received sms lost");
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.registered {
            if let Some(imsi) = self.imsi.clone() {
                let handle = WorkerHandle {
                    actor: self.mailbox.actor_ref(),
                    imsi,
                    device: self.device.clone(),
                };
                let _ = self.manager.send(Message::ImsiUnregister(handle));
            }
            self.registered = false;
        }
        if let Err(e) = self.driver.close().await {
            warn!(device = %self.device, error = %e, "modem close failed");
        }
        self.concat.stop();

        // Answer whatever is still queued, then observe the close marker.
        // 答复仍在排队的消息，然后观察关闭标记。
        self.mailbox.close_channel();
        loop {
            match self.mailbox.recv(None).await {
                Message::ChannelClosed => break,
                Message::TxSms(req) => {
                    req.reply
                        .respond(StatusResponse::error("modem is shutting down"));
                }
                other => {
                    warn!(device = %self.device, ?other, "message discarded during worker drain");
                }
            }
        }
        info!(device = %self.device, "modem worker stopped");
    }
}
