//! Error types for the msgbox gateway
//! msgbox网关的错误类型

use thiserror::Error;

/// Gateway error types / 网关错误类型
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No SIM configuration matches the request / 没有匹配请求的SIM配置
    #[error("{selector}: sim not known")]
    SimNotKnown { selector: String },

    /// A phone number is already assigned to another SIM / 电话号码已分配给其他SIM
    #[error("phone number {number} already assigned to sim {imsi}")]
    PhoneNumberTaken { number: String, imsi: String },

    /// Modem hardware or session error / 调制解调器硬件或会话错误
    #[error("modem error: {0}")]
    Modem(String),

    /// The delivery queue no longer accepts items / 投递队列不再接受条目
    #[error("delivery queue stopped")]
    DeliveryStopped,

    /// Configuration error / 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error / IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error / 序列化错误
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for gateway operations / 网关操作的结果类型别名
pub type GatewayResult<T> = Result<T, GatewayError>;
