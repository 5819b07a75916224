//! Actor substrate: mailboxes with selective receive and a cooperative
//! close-channel shutdown handshake
//! Actor基础设施：支持选择性接收和协作式关闭通道握手的邮箱
//!
//! Every long-lived component of the gateway (modem workers, the SIM
//! manager, the serial port supervisor) runs as an isolated tokio task that
//! owns exactly one [`Mailbox`]. Cross-task effects happen only by sending
//! messages through an [`ActorRef`].
//! 网关中的每个长生命周期组件（调制解调器工作者、SIM管理器、串口监督者）
//! 都作为一个独立的tokio任务运行，独占一个[`Mailbox`]。跨任务的影响只能
//! 通过[`ActorRef`]发送消息来实现。
//!
//! Two properties matter for the shutdown protocol:
//! 关闭协议依赖两个性质：
//!
//! - `recv_only` defers non-matching messages instead of dropping them;
//!   deferred messages are replayed in arrival order before newer ones.
//!   `recv_only`会延迟不匹配的消息而不是丢弃它们；延迟的消息按到达顺序
//!   在较新消息之前重放。
//! - `close_channel` atomically stops accepting new messages and injects a
//!   final close marker, so the owner can drain already-queued work and
//!   know exactly when no more can arrive.
//!   `close_channel`原子地停止接受新消息并注入最终的关闭标记，使所有者
//!   可以排空已入队的工作，并确切知道何时不会再有消息到达。

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A message that can travel through a [`Mailbox`] / 可通过[`Mailbox`]传递的消息
///
/// Implementors are closed enums; `Kind` is the parallel discriminant type
/// used by acceptance filters and selective receive.
/// 实现者是封闭的枚举类型；`Kind`是接受过滤器和选择性接收使用的并行判别类型。
pub trait ActorMessage: Send + fmt::Debug + 'static {
    /// Discriminant type / 判别类型
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The discriminant of this message / 此消息的判别值
    fn kind(&self) -> Self::Kind;

    /// Message synthesized when a receive deadline elapses
    /// 接收超时时合成的消息
    fn timeout() -> Self;

    /// The close marker injected by `close_channel`
    /// 由`close_channel`注入的关闭标记
    fn channel_closed() -> Self;
}

/// Error returned by [`ActorRef::send`] / [`ActorRef::send`]返回的错误
///
/// The undelivered message is handed back so the caller can reply to the
/// originator instead of silently losing it.
/// 未投递的消息会被交还，调用者可以据此回复发起方而不是静默丢失。
#[derive(Debug, thiserror::Error)]
pub enum SendError<M> {
    /// The target's acceptance filter excludes this message kind
    /// 目标的接受过滤器排除了此消息类型
    #[error("message rejected: target no longer accepts this kind")]
    Rejected(M),
    /// The target task is gone / 目标任务已不存在
    #[error("message not delivered: target mailbox is gone")]
    Closed(M),
}

impl<M> SendError<M> {
    /// Recover the undelivered message / 取回未投递的消息
    pub fn into_inner(self) -> M {
        match self {
            SendError::Rejected(m) | SendError::Closed(m) => m,
        }
    }
}

enum Accept<K> {
    All,
    Only(HashSet<K>),
}

impl<K: Eq + Hash> Accept<K> {
    fn allows(&self, kind: &K) -> bool {
        match self {
            Accept::All => true,
            Accept::Only(set) => set.contains(kind),
        }
    }
}

struct Shared<M: ActorMessage> {
    name: String,
    id: Uuid,
    accept: RwLock<Accept<M::Kind>>,
    tx: mpsc::UnboundedSender<M>,
}

/// Cloneable handle for sending messages to an actor
/// 用于向actor发送消息的可克隆句柄
pub struct ActorRef<M: ActorMessage> {
    shared: Arc<Shared<M>>,
}

impl<M: ActorMessage> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ActorMessage> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("name", &self.shared.name)
            .field("id", &self.shared.id)
            .finish()
    }
}

impl<M: ActorMessage> PartialEq for ActorRef<M> {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl<M: ActorMessage> Eq for ActorRef<M> {}

impl<M: ActorMessage> ActorRef<M> {
    /// Actor name, used in logs / actor名称，用于日志
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Stable actor identity / 稳定的actor标识
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Enqueue a message unless the target's acceptance filter excludes its
    /// kind. The rejection is observable to the caller, never to the target.
    /// 将消息入队，除非目标的接受过滤器排除了其类型。拒绝只对调用者可见，
    /// 对目标不可见。
    pub fn send(&self, msg: M) -> Result<(), SendError<M>> {
        // The guard must span the enqueue: a send racing `close_channel`
        // either lands before the close marker or is rejected, never after.
        // 守卫必须覆盖入队：与`close_channel`竞争的发送要么排在关闭标记
        // 之前，要么被拒绝，绝不会排在其后。
        let accept = self.shared.accept.read();
        if !accept.allows(&msg.kind()) {
            return Err(SendError::Rejected(msg));
        }
        self.shared
            .tx
            .send(msg)
            .map_err(|e| SendError::Closed(e.0))
    }
}

/// Receiving half of an actor's message queue, owned by exactly one task
/// actor消息队列的接收端，由恰好一个任务独占
pub struct Mailbox<M: ActorMessage> {
    shared: Arc<Shared<M>>,
    rx: mpsc::UnboundedReceiver<M>,
    deferred: VecDeque<M>,
}

impl<M: ActorMessage> Mailbox<M> {
    /// Create a mailbox and its sending handle / 创建邮箱及其发送句柄
    pub fn channel(name: impl Into<String>) -> (ActorRef<M>, Mailbox<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.into(),
            id: Uuid::new_v4(),
            accept: RwLock::new(Accept::All),
            tx,
        });
        let actor_ref = ActorRef {
            shared: Arc::clone(&shared),
        };
        let mailbox = Mailbox {
            shared,
            rx,
            deferred: VecDeque::new(),
        };
        (actor_ref, mailbox)
    }

    /// Handle for sending messages to this mailbox / 向此邮箱发送消息的句柄
    pub fn actor_ref(&self) -> ActorRef<M> {
        ActorRef {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Receive the next message: oldest deferred first, then the queue.
    /// On deadline elapse a `timeout` message is returned, never an absence.
    /// 接收下一条消息：最旧的延迟消息优先，然后是队列。超时时返回
    /// `timeout`消息，绝不返回空。
    pub async fn recv(&mut self, timeout: Option<Duration>) -> M {
        if let Some(msg) = self.deferred.pop_front() {
            return msg;
        }
        self.recv_queue(timeout).await
    }

    /// Selective receive: return the oldest message of `kind`, deferring
    /// every non-matching message for later replay.
    /// 选择性接收：返回最旧的`kind`类型消息，将所有不匹配的消息延迟
    /// 以便之后重放。
    pub async fn recv_only(&mut self, kind: M::Kind, timeout: Option<Duration>) -> M {
        if let Some(pos) = self.deferred.iter().position(|m| m.kind() == kind) {
            // remove() preserves the arrival order of the rest
            // remove()保留其余消息的到达顺序
            return self.deferred.remove(pos).expect("position just found");
        }

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let left = match deadline {
                Some(d) => {
                    let now = tokio::time::Instant::now();
                    if d <= now {
                        return M::timeout();
                    }
                    Some(d - now)
                }
                None => None,
            };
            let msg = self.recv_queue(left).await;
            if msg.kind() == kind {
                return msg;
            }
            if msg.kind() == M::timeout().kind() {
                // Synthesized by the elapsed deadline; a real Timeout sent by
                // a peer matches the wanted kind above.
                // 由超时合成；对端发送的真实Timeout消息会在上面匹配。
                return msg;
            }
            self.deferred.push_back(msg);
        }
    }

    async fn recv_queue(&mut self, timeout: Option<Duration>) -> M {
        match timeout {
            None => match self.rx.recv().await {
                Some(msg) => msg,
                // Unreachable while `shared` holds a sender; treated as a
                // close marker rather than a panic.
                // 只要`shared`持有发送端就不可达；按关闭标记处理而不是panic。
                None => M::channel_closed(),
            },
            Some(t) => match tokio::time::timeout(t, self.rx.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => M::channel_closed(),
                Err(_) => M::timeout(),
            },
        }
    }

    /// Restrict the acceptance filter to the given kinds / 将接受过滤器限制为给定类型
    pub fn accept_only(&self, kinds: impl IntoIterator<Item = M::Kind>) {
        *self.shared.accept.write() = Accept::Only(kinds.into_iter().collect());
    }

    /// Accept every message kind again / 重新接受所有消息类型
    pub fn accept_all(&self) {
        *self.shared.accept.write() = Accept::All;
    }

    /// Begin the shutdown handshake: set the acceptance filter to the empty
    /// set, then inject the close marker as the last deliverable item. All
    /// later external sends fail with `Rejected`; already-queued messages
    /// remain drainable.
    /// 开始关闭握手：将接受过滤器设为空集，然后注入关闭标记作为最后一条
    /// 可投递项。之后所有外部发送都会以`Rejected`失败；已入队的消息仍可排空。
    pub fn close_channel(&self) {
        // Filter flip and marker injection are one atomic step under the
        // write guard, so no in-flight send can slip in between them.
        // 过滤器翻转和标记注入在写守卫下是一个原子步骤，途中的发送
        // 无法插入其间。
        let mut accept = self.shared.accept.write();
        *accept = Accept::Only(HashSet::new());
        // Internal injection bypasses the filter on purpose.
        // 内部注入有意绕过过滤器。
        let _ = self.shared.tx.send(M::channel_closed());
    }
}

impl<M: ActorMessage> Drop for Mailbox<M> {
    fn drop(&mut self) {
        // An actor body that returns with messages still queued has lost
        // work; surface it as a defect.
        // actor主体在仍有消息排队时返回意味着丢失了工作；作为缺陷暴露出来。
        let closed_kind = M::channel_closed().kind();
        let mut leaked = 0usize;
        for msg in self.deferred.drain(..) {
            if msg.kind() != closed_kind {
                tracing::error!(actor = %self.shared.name, ?msg, "unprocessed deferred message");
                leaked += 1;
            }
        }
        while let Ok(msg) = self.rx.try_recv() {
            if msg.kind() != closed_kind {
                tracing::error!(actor = %self.shared.name, ?msg, "unprocessed queued message");
                leaked += 1;
            }
        }
        if leaked > 0 {
            tracing::error!(actor = %self.shared.name, leaked, "mailbox dropped with unprocessed messages");
        }
    }
}
