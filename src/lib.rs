//! msgbox: GSM modem to HTTP message bus gateway
//! msgbox: GSM调制解调器到HTTP消息总线的网关
//!
//! One worker actor per attached modem receives SMS and forwards them to a
//! per-SIM destination URL, and HTTP requests send SMS through a chosen SIM.
//! 每个连接的调制解调器对应一个工作者actor，接收短信并转发到每张SIM卡
//! 配置的目标URL，同时HTTP请求可以通过选定的SIM卡发送短信。

// Shared modules / 共享模块
pub mod actor;
pub mod config;

// Service module / 服务模块
pub mod gateway;

// Re-exports / 重新导出
pub use actor::{ActorMessage, ActorRef, Mailbox, SendError};
pub use gateway::{GatewayError, GatewayResult, Message, MessageKind};
