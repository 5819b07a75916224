//! Gateway service module / 网关服务模块
//!
//! This module contains the whole modem-to-HTTP gateway:
//! 此模块包含完整的调制解调器到HTTP的网关：
//!
//! - SIM configuration store and manager / SIM配置存储和管理器
//! - Per-device modem worker state machine / 每设备的调制解调器工作者状态机
//! - Serial port supervision / 串口监督
//! - Multipart SMS reassembly / 多段短信重组
//! - Outbound HTTP delivery queue / 出站HTTP投递队列
//! - Inbound HTTP API / 入站HTTP API
//!
//! ## Architecture / 架构
//!
//! ```text
//! ┌──────────────┐   TxSms    ┌──────────────┐   TxSms   ┌──────────────┐
//! │ HTTP gateway │ ─────────► │ SIM manager  │ ────────► │ Modem worker │
//! │ HTTP网关     │            │ SIM管理器    │           │ 工作者       │
//! └──────────────┘            └──────────────┘           └──────┬───────┘
//!                                    ▲  ImsiRegister            │ RxSms
//!                                    └──────────────────────────┤
//! ┌──────────────┐  spawns                                      ▼
//! │ Supervisor   │ ────────► workers               ┌──────────────────┐
//! │ 串口监督者   │                                 │ Delivery queue   │
//! └──────────────┘                                 │ 投递队列 → URL   │
//!                                                  └──────────────────┘
//! ```

pub mod concat;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod http_gateway;
pub mod manager;
pub mod message;
pub mod modem;
pub mod routes;
pub mod sim;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
pub mod delivery_test;
#[cfg(test)]
pub mod handlers_test;
#[cfg(test)]
pub mod supervisor_test;

// Re-export commonly used types / 重新导出常用类型
pub use config::{CliArgs, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use http_gateway::HttpGateway;
pub use manager::SimManager;
pub use message::{Message, MessageKind, StatusResponse};
pub use supervisor::SerialPortSupervisor;
