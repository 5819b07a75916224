//! SIM manager actor: identity arbitration and outbound routing
//! SIM管理器actor：标识仲裁与出站路由
//!
//! The manager is the single owner of the SIM config store and of the
//! imsi → worker binding map. Workers claim their SIM identity at startup;
//! the first claimant wins and later claimants are denied, which keeps at
//! most one live worker per SIM. Outbound send requests are routed here to
//! the bound worker, by sender phone number first and explicit imsi second.
//! 管理器是SIM配置存储和imsi → 工作者绑定映射的唯一所有者。工作者在启动
//! 时声明其SIM标识；先声明者获胜，后来者被拒绝，从而保证每张SIM至多一个
//! 存活的工作者。出站发送请求在这里路由到绑定的工作者，优先按发送方电话
//! 号码，其次按明确的imsi。

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::actor::{ActorRef, Mailbox};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::message::{Message, StatusResponse, TxSmsRequest, WorkerHandle};
use crate::gateway::sim::{SimConfig, SimConfigStore, SimConfigUpdate};

/// Handle to the running SIM manager task / 运行中SIM管理器任务的句柄
pub struct SimManager {
    actor: ActorRef<Message>,
}

impl SimManager {
    /// Spawn the manager actor around a loaded store
    /// 围绕已加载的存储启动管理器actor
    pub fn start(store: SimConfigStore) -> Self {
        let (actor, mailbox) = Mailbox::channel("sim-manager");
        tokio::spawn(async move {
            SimManagerCore::new(store).run(mailbox).await;
        });
        Self { actor }
    }

    pub fn actor_ref(&self) -> ActorRef<Message> {
        self.actor.clone()
    }

    /// Request shutdown and wait until the manager has stopped every bound
    /// worker and drained its own mailbox.
    /// 请求关闭，并等待管理器停止所有绑定的工作者并排空自身邮箱。
    pub async fn stop(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .actor
            .send(Message::Stop {
                done: Some(done_tx),
            })
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }
}

/// Manager state and message handling, separated from the task loop so
/// tests can drive it directly.
/// 管理器状态与消息处理，与任务循环分离以便测试直接驱动。
pub struct SimManagerCore {
    store: SimConfigStore,
    /// Live binding of each SIM to the worker that claimed it
    /// 每张SIM与声明它的工作者之间的存活绑定
    workers: HashMap<String, WorkerHandle>,
    draining: bool,
}

impl SimManagerCore {
    pub fn new(store: SimConfigStore) -> Self {
        Self {
            store,
            workers: HashMap::new(),
            draining: false,
        }
    }

    async fn run(mut self, mut mailbox: Mailbox<Message>) {
        info!(sims = self.store.len(), "sim manager started");
        let mut done: Option<oneshot::Sender<()>> = None;
        loop {
            match mailbox.recv(None).await {
                Message::Stop { done: ack } => {
                    info!(bound = self.workers.len(), "sim manager stopping");
                    if ack.is_some() {
                        done = ack;
                    }
                    self.draining = true;
                    for handle in self.workers.values() {
                        if handle.actor.send(Message::stop()).is_err() {
                            warn!(imsi = %handle.imsi, "worker unreachable on stop");
                        }
                    }
                    if self.workers.is_empty() {
                        break;
                    }
                }
                Message::ImsiRegister(handle) => self.handle_register(handle),
                Message::ImsiUnregister(handle) => {
                    self.handle_unregister(handle);
                    if self.draining && self.workers.is_empty() {
                        break;
                    }
                }
                Message::TxSms(req) => self.route_tx(req),
                other => warn!(kind = ?crate::actor::ActorMessage::kind(&other), "unexpected message in sim manager"),
            }
        }

        // No more senders are welcome; whatever is already queued gets a
        // definite answer before the task returns.
        // 不再接受新的发送者；已入队的消息在任务返回前都会得到明确答复。
        mailbox.close_channel();
        loop {
            match mailbox.recv(None).await {
                Message::ChannelClosed => break,
                Message::TxSms(req) => {
                    req.reply
                        .respond(StatusResponse::error("gateway is shutting down"));
                }
                Message::ImsiRegister(handle) => {
                    // A worker that raced the shutdown still gets a verdict
                    // and an order to stop.
                    // 与关闭竞争的工作者仍会得到裁决和停止指令。
                    self.deny_registration(&handle);
                    let _ = handle.actor.send(Message::stop());
                }
                other => warn!(?other, "message discarded during manager drain"),
            }
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
        info!("sim manager stopped");
    }

    fn handle_register(&mut self, handle: WorkerHandle) {
        if self.draining {
            info!(imsi = %handle.imsi, "registration during drain, stopping claimant");
            self.deny_registration(&handle);
            let _ = handle.actor.send(Message::stop());
            return;
        }
        if let Some(existing) = self.workers.get(&handle.imsi) {
            if *existing == handle {
                // Periodic re-registration from the bound worker just
                // refreshes its verdict and config snapshot.
                // 已绑定工作者的周期性重注册只是刷新其裁决和配置快照。
                let config = self.store.get(&handle.imsi).cloned();
                let _ = handle.actor.send(Message::ImsiRegistration {
                    success: true,
                    config,
                });
                return;
            }
            warn!(
                imsi = %handle.imsi,
                device = %handle.device,
                bound_device = %existing.device,
                "sim already claimed, denying registration"
            );
            self.deny_registration(&handle);
            return;
        }

        let config = match self.config_for(&handle.imsi) {
            Ok(config) => config,
            Err(e) => {
                error!(imsi = %handle.imsi, error = %e, "cannot persist new sim config");
                self.deny_registration(&handle);
                return;
            }
        };
        info!(imsi = %handle.imsi, device = %handle.device, "worker registered");
        let verdict = Message::ImsiRegistration {
            success: true,
            config: Some(config),
        };
        if handle.actor.send(verdict).is_err() {
            warn!(imsi = %handle.imsi, "worker vanished before registration reply");
            return;
        }
        self.workers.insert(handle.imsi.clone(), handle);
    }

    /// Look up the config for an imsi, creating one on first sight
    /// 查找imsi的配置，首次发现时创建
    fn config_for(&mut self, imsi: &str) -> GatewayResult<SimConfig> {
        if let Some(config) = self.store.get(imsi) {
            return Ok(config.clone());
        }
        info!(imsi = %imsi, "new sim discovered");
        self.store.add(imsi).map(SimConfig::clone)
    }

    fn deny_registration(&self, handle: &WorkerHandle) {
        let verdict = Message::ImsiRegistration {
            success: false,
            config: None,
        };
        let _ = handle.actor.send(verdict);
    }

    /// Unbind only if the releasing worker is the one currently bound;
    /// a denied claimant unregistering must not evict the winner.
    /// 仅当释放者正是当前绑定的工作者时才解除绑定；被拒绝的声明者
    /// 注销时不得驱逐获胜者。
    fn handle_unregister(&mut self, handle: WorkerHandle) {
        match self.workers.get(&handle.imsi) {
            Some(bound) if *bound == handle => {
                info!(imsi = %handle.imsi, device = %handle.device, "worker unregistered");
                self.workers.remove(&handle.imsi);
            }
            _ => {
                warn!(imsi = %handle.imsi, device = %handle.device, "unregister from unbound worker ignored");
            }
        }
    }

    /// Route an outbound request to the bound worker. Routing failures are
    /// answered on the request's reply handle, never dropped.
    /// 将出站请求路由到绑定的工作者。路由失败通过请求的回复句柄答复，
    /// 绝不丢弃。
    fn route_tx(&mut self, req: TxSmsRequest) {
        let imsi = match self.resolve_imsi(&req) {
            Ok(imsi) => imsi,
            Err(e) => {
                req.reply.respond(StatusResponse::error(e.to_string()));
                return;
            }
        };
        let Some(handle) = self.workers.get(&imsi) else {
            req.reply
                .respond(StatusResponse::error(format!("{imsi}: no active modem")));
            return;
        };
        if let Err(e) = handle.actor.send(Message::TxSms(req)) {
            // The worker is tearing down; hand the caller a real answer
            // rather than a hang.
            // 工作者正在退出；给调用方一个确切答复而不是挂起。
            if let Message::TxSms(req) = e.into_inner() {
                req.reply
                    .respond(StatusResponse::error(format!("{imsi}: no active modem")));
            }
        }
    }

    /// Sender phone number takes precedence over explicit imsi
    /// 发送方电话号码优先于明确的imsi
    fn resolve_imsi(&self, req: &TxSmsRequest) -> GatewayResult<String> {
        if let Some(sender) = req.sender.as_deref() {
            return self
                .store
                .find_by_phone_number(sender)
                .map(|c| c.imsi.clone())
                .ok_or_else(|| GatewayError::SimNotKnown {
                    selector: format!("sender {sender}"),
                });
        }
        if let Some(imsi) = req.imsi.as_deref() {
            return self
                .store
                .get(imsi)
                .map(|c| c.imsi.clone())
                .ok_or_else(|| GatewayError::SimNotKnown {
                    selector: format!("imsi {imsi}"),
                });
        }
        Err(GatewayError::Config(
            "send request carries neither sender nor imsi".to_string(),
        ))
    }

    /// Apply a config mutation through the manager-owned store and push
    /// the new snapshot to the bound worker, if any.
    /// 通过管理器拥有的存储应用配置变更，并将新快照推送给绑定的工作者
    /// （如果有）。
    pub fn update_sim(
        &mut self,
        imsi: &str,
        update: SimConfigUpdate,
    ) -> GatewayResult<SimConfig> {
        let updated = self.store.update(imsi, update)?;
        if let Some(handle) = self.workers.get(imsi) {
            if handle
                .actor
                .send(Message::SimConfigChanged(updated.clone()))
                .is_err()
            {
                warn!(imsi = %imsi, "bound worker unreachable for config change");
            }
        }
        Ok(updated)
    }

    /// The underlying store (read-only view) / 底层存储（只读视图）
    pub fn store(&self) -> &SimConfigStore {
        &self.store
    }

    /// Number of currently bound workers / 当前绑定的工作者数量
    pub fn bound_workers(&self) -> usize {
        self.workers.len()
    }

    /// Dispatch one message against the core, outside the task loop
    /// 在任务循环之外对核心分发一条消息
    pub fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::ImsiRegister(handle) => self.handle_register(handle),
            Message::ImsiUnregister(handle) => self.handle_unregister(handle),
            Message::TxSms(req) => self.route_tx(req),
            other => warn!(?other, "message kind not handled by the manager core"),
        }
    }
}
