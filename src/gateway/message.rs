//! The closed message set exchanged between gateway actors
//! 网关actor之间交换的封闭消息集合
//!
//! The source of truth for "who may tell what to whom": every cross-actor
//! effect in the gateway is one of these variants. Dispatch is exhaustive
//! pattern matching per worker state, so an unhandled kind is a compile
//! error, not a runtime surprise.
//! 这是"谁可以向谁传达什么"的唯一依据：网关中每个跨actor的影响都是这些
//! 变体之一。分发依靠各工作者状态的穷尽模式匹配，未处理的类型是编译错误
//! 而不是运行时意外。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::actor::{ActorMessage, ActorRef};

use super::sim::SimConfig;

/// Multipart SMS header info as reported by the modem driver
/// 调制解调器驱动报告的多段短信头信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatInfo {
    /// Concatenation reference shared by all parts / 所有分段共享的串联引用号
    pub reference: u16,
    /// Declared total number of parts / 声明的分段总数
    pub total_parts: u8,
    /// 1-based sequence number of this part / 此分段的序号（从1开始）
    pub seq: u8,
}

/// Delivery status of a send request, also the HTTP response body
/// 发送请求的投递状态，同时也是HTTP响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
    pub desc: String,
}

/// OK or ERROR / 成功或失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

impl StatusResponse {
    pub fn ok(desc: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            desc: desc.into(),
        }
    }

    pub fn error(desc: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            desc: desc.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// One-shot reply callback carried by a send request; fires exactly once
/// 发送请求携带的一次性回复回调；恰好触发一次
#[derive(Debug)]
pub struct ReplyHandle(oneshot::Sender<StatusResponse>);

impl ReplyHandle {
    /// Build a handle together with the receiving end
    /// 构建句柄及其接收端
    pub fn pair() -> (Self, oneshot::Receiver<StatusResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Deliver the status to the originator. A dropped receiver is logged,
    /// not an error: the HTTP client may have gone away.
    /// 将状态投递给发起方。接收端已被丢弃只记录日志，不算错误：
    /// HTTP客户端可能已经断开。
    pub fn respond(self, status: StatusResponse) {
        if status.is_error() {
            tracing::warn!(desc = %status.desc, "send request failed");
        } else {
            tracing::info!(desc = %status.desc, "send request completed");
        }
        if self.0.send(status).is_err() {
            tracing::debug!("reply receiver dropped before response");
        }
    }
}

/// Outbound send request routed from HTTP through the SIM manager to a worker
/// 从HTTP经SIM管理器路由到工作者的出站发送请求
///
/// Exactly one of `sender` / `imsi` is set (enforced at the HTTP boundary).
/// `sender`和`imsi`恰好设置一个（在HTTP边界强制执行）。
#[derive(Debug)]
pub struct TxSmsRequest {
    /// Originating phone number used to pick the SIM / 用于选择SIM的发送方号码
    pub sender: Option<String>,
    /// Destination phone number / 目的电话号码
    pub recipient: String,
    /// Message text / 短信正文
    pub text: String,
    /// Explicit SIM identity, alternative to `sender` / 明确的SIM标识，`sender`的替代
    pub imsi: Option<String>,
    /// Opaque passthrough key from the caller / 调用方透传的不透明key
    pub key: Option<String>,
    /// Fired exactly once with the outcome / 恰好触发一次，携带结果
    pub reply: ReplyHandle,
}

impl fmt::Display for TxSmsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.sender, &self.imsi) {
            (Some(sender), _) => write!(f, "sms to {} via sender {}", self.recipient, sender),
            (None, Some(imsi)) => write!(f, "sms to {} via imsi {}", self.recipient, imsi),
            (None, None) => write!(f, "sms to {}", self.recipient),
        }
    }
}

/// An inbound SMS travelling from the driver hook to the delivery queue
/// 从驱动回调流向投递队列的入站短信
///
/// The driver only knows sender, text, timestamp and the multipart header;
/// the worker fills `recipient_number` and `destination_url` from its SIM
/// configuration before reassembly and forwarding.
/// 驱动只知道发送方、正文、时间戳和多段头；工作者在重组和转发之前根据
/// 其SIM配置填写`recipient_number`和`destination_url`。
#[derive(Debug, Clone)]
pub struct RxSmsRequest {
    /// Originating phone number / 发送方号码
    pub sender_number: String,
    /// Phone number of the receiving SIM / 接收SIM的电话号码
    pub recipient_number: String,
    /// Message text / 短信正文
    pub text: String,
    /// Receive timestamp / 接收时间戳
    pub timestamp: DateTime<Utc>,
    /// Destination URL for HTTP delivery / HTTP投递的目标URL
    pub destination_url: String,
    /// Present while the message is an unmerged part / 消息尚未合并时存在
    pub concat_info: Option<ConcatInfo>,
}

/// Identity of a modem worker as seen by the SIM manager and supervisor
/// SIM管理器和监督者视角下的调制解调器工作者标识
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Mailbox handle of the worker / 工作者的邮箱句柄
    pub actor: ActorRef<Message>,
    /// SIM identity read from the hardware / 从硬件读取的SIM标识
    pub imsi: String,
    /// Device path owning the modem / 拥有该调制解调器的设备路径
    pub device: String,
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.actor == other.actor
    }
}

/// The closed set of gateway messages / 网关消息的封闭集合
#[derive(Debug)]
pub enum Message {
    /// Advisory stop request; the optional ack fires when the receiving
    /// actor has fully shut down (used by the SIM manager).
    /// 建议性停止请求；可选的ack在接收actor完全关闭后触发（SIM管理器使用）。
    Stop { done: Option<oneshot::Sender<()>> },
    /// Synthesized when a receive deadline elapses / 接收超时时合成
    Timeout,
    /// Final marker injected by `close_channel` / 由`close_channel`注入的最终标记
    ChannelClosed,
    /// Worker claims ownership of its SIM identity / 工作者声明其SIM标识的所有权
    ImsiRegister(WorkerHandle),
    /// Worker releases its SIM identity / 工作者释放其SIM标识
    ImsiUnregister(WorkerHandle),
    /// SIM manager's registration verdict / SIM管理器的注册裁决
    ImsiRegistration {
        success: bool,
        config: Option<SimConfig>,
    },
    /// The worker's SIM configuration was updated; carries the new snapshot
    /// 工作者的SIM配置已更新；携带新的快照
    SimConfigChanged(SimConfig),
    /// A worker announces its own termination to the supervisor
    /// 工作者向监督者宣告自身终止
    ShutdownNotification { device: String },
    /// Outbound send request / 出站发送请求
    TxSms(TxSmsRequest),
    /// Inbound received SMS (raw part or merged) / 入站短信（原始分段或已合并）
    RxSms(RxSmsRequest),
}

impl Message {
    /// Plain stop without acknowledgement / 不带确认的普通停止
    pub fn stop() -> Self {
        Message::Stop { done: None }
    }
}

/// Discriminants of [`Message`], used by filters and selective receive
/// [`Message`]的判别值，供过滤器和选择性接收使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Stop,
    Timeout,
    ChannelClosed,
    ImsiRegister,
    ImsiUnregister,
    ImsiRegistration,
    SimConfigChanged,
    ShutdownNotification,
    TxSms,
    RxSms,
}

impl ActorMessage for Message {
    type Kind = MessageKind;

    fn kind(&self) -> MessageKind {
        match self {
            Message::Stop { .. } => MessageKind::Stop,
            Message::Timeout => MessageKind::Timeout,
            Message::ChannelClosed => MessageKind::ChannelClosed,
            Message::ImsiRegister(_) => MessageKind::ImsiRegister,
            Message::ImsiUnregister(_) => MessageKind::ImsiUnregister,
            Message::ImsiRegistration { .. } => MessageKind::ImsiRegistration,
            Message::SimConfigChanged(_) => MessageKind::SimConfigChanged,
            Message::ShutdownNotification { .. } => MessageKind::ShutdownNotification,
            Message::TxSms(_) => MessageKind::TxSms,
            Message::RxSms(_) => MessageKind::RxSms,
        }
    }

    fn timeout() -> Self {
        Message::Timeout
    }

    fn channel_closed() -> Self {
        Message::ChannelClosed
    }
}
