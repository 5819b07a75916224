//! Modem driver boundary / 调制解调器驱动边界
//!
//! The gateway core never talks to hardware directly; it depends on the
//! [`ModemDriver`] trait only. The supervisor builds one driver per device
//! through a [`ModemDriverFactory`], and tests inject mock drivers the same
//! way.
//! 网关核心从不直接与硬件对话；它只依赖[`ModemDriver`] trait。监督者通过
//! [`ModemDriverFactory`]为每个设备构建一个驱动，测试也以同样的方式注入
//! 模拟驱动。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::GatewayResult;
use super::message::ConcatInfo;

pub mod at;

pub use at::{SerialAtModemFactory, DEFAULT_BAUD_RATE};

/// Read-only hardware identity captured at connect time
/// 连接时采集的只读硬件标识
#[derive(Debug, Clone)]
pub struct ModemIdentity {
    /// SIM subscriber identity / SIM用户标识
    pub imsi: String,
    /// Device and network details / 设备与网络详情
    pub info: ModemInfo,
}

/// Device information read from the modem / 从调制解调器读取的设备信息
#[derive(Debug, Clone, Default)]
pub struct ModemInfo {
    pub imei: String,
    pub manufacturer: String,
    pub model: String,
    pub network: String,
    pub revision: String,
    /// Human-readable signal strength / 人类可读的信号强度
    pub signal: String,
}

/// Describe a raw signal strength reading / 描述原始信号强度读数
pub fn signal_strength_desc(n: u32) -> String {
    let desc = match n {
        0..=9 => "marginal",
        10..=14 => "workable",
        15..=19 => "good",
        _ => "excellent",
    };
    format!("{n} {desc}")
}

/// A received SMS as reported by the hardware / 硬件报告的已接收短信
#[derive(Debug, Clone)]
pub struct IncomingSms {
    /// Originating phone number / 发送方号码
    pub sender: String,
    /// Message text / 短信正文
    pub text: String,
    /// Receive timestamp / 接收时间戳
    pub timestamp: DateTime<Utc>,
    /// Multipart header, when the message is one part of many
    /// 多段头，当消息是多个分段之一时存在
    pub concat: Option<ConcatInfo>,
}

/// Callback invoked by the driver for every inbound SMS
/// 驱动为每条入站短信调用的回调
pub type SmsHook = Arc<dyn Fn(IncomingSms) + Send + Sync>;

/// The hardware session owned by one modem worker
/// 由一个调制解调器工作者独占的硬件会话
#[async_trait]
pub trait ModemDriver: Send + Sync {
    /// Open the session and read the hardware identity
    /// 打开会话并读取硬件标识
    async fn connect(&self) -> GatewayResult<ModemIdentity>;

    /// Close the session; idempotent / 关闭会话；幂等
    async fn close(&self) -> GatewayResult<()>;

    /// Send one SMS / 发送一条短信
    async fn send_sms(&self, recipient: &str, text: &str) -> GatewayResult<()>;

    /// Block up to `timeout` for network registration; returns the raw
    /// signal strength on success.
    /// 最多阻塞`timeout`等待网络注册；成功时返回原始信号强度。
    async fn wait_for_network_coverage(&self, timeout: Duration) -> GatewayResult<u32>;

    /// Flush SMS buffered on the hardware through the inbound hook
    /// 通过入站回调冲刷硬件上缓存的短信
    async fn drain_stored_sms(&self) -> GatewayResult<()>;
}

/// Builds one driver per device path / 为每个设备路径构建一个驱动
pub trait ModemDriverFactory: Send + Sync {
    fn build(&self, device: &str, hook: SmsHook) -> Arc<dyn ModemDriver>;
}
