//! HTTP request handlers / HTTP请求处理器
//!
//! The handlers validate parameters at the boundary and translate between
//! HTTP forms and gateway messages. Routing decisions belong to the SIM
//! manager; a handler only waits for the reply callback to fire.
//! 处理器在边界处校验参数，并在HTTP表单与网关消息之间转换。路由决策属于
//! SIM管理器；处理器只等待回复回调触发。

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::actor::ActorRef;
use crate::gateway::delivery::DeliveryQueue;
use crate::gateway::message::{Message, ReplyHandle, StatusResponse, TxSmsRequest};

/// Shared state of all HTTP handlers / 所有HTTP处理器的共享状态
#[derive(Clone)]
pub struct GatewayState {
    /// SIM manager mailbox / SIM管理器邮箱
    pub manager: ActorRef<Message>,
    /// Delivery queue, for health reporting / 投递队列，用于健康报告
    pub delivery: Arc<DeliveryQueue>,
}

/// Form body of `POST /send_sms` / `POST /send_sms`的表单体
#[derive(Debug, Deserialize)]
pub struct SendSmsForm {
    /// Phone number selecting the SIM / 选择SIM的电话号码
    pub sender: Option<String>,
    /// Destination phone number / 目的电话号码
    pub receiver: String,
    /// Message text / 短信正文
    pub text: String,
    /// Explicit SIM identity, alternative to `sender` / 明确的SIM标识，`sender`的替代
    pub imsi: Option<String>,
    /// Opaque passthrough key / 不透明的透传key
    pub key: Option<String>,
}

/// Send an SMS through one of the attached modems
/// 通过连接的调制解调器之一发送短信
pub async fn send_sms(
    State(state): State<GatewayState>,
    Form(form): Form<SendSmsForm>,
) -> (StatusCode, Json<StatusResponse>) {
    // Exactly one way of selecting the SIM. / 恰好一种选择SIM的方式。
    match (&form.sender, &form.imsi) {
        (Some(_), Some(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::error(
                    "sender and imsi are mutually exclusive",
                )),
            );
        }
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::error("one of sender or imsi is required")),
            );
        }
        _ => {}
    }

    let (reply, reply_rx) = ReplyHandle::pair();
    let req = TxSmsRequest {
        sender: form.sender,
        recipient: form.receiver,
        text: form.text,
        imsi: form.imsi,
        key: form.key,
        reply,
    };
    info!(request = %req, "send request accepted");

    if state.manager.send(Message::TxSms(req)).is_err() {
        return (
            StatusCode::OK,
            Json(StatusResponse::error("gateway is shutting down")),
        );
    }
    match reply_rx.await {
        Ok(status) => (StatusCode::OK, Json(status)),
        // The handling worker died before answering. / 处理的工作者在答复前终止。
        Err(_) => (
            StatusCode::OK,
            Json(StatusResponse::error("no response from modem worker")),
        ),
    }
}

/// Health probe body / 健康探测响应体
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub delivered: u64,
    pub dropped: u64,
}

/// Liveness probe with delivery counters / 携带投递计数器的存活探测
pub async fn health_check(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let stats = state.delivery.stats();
    Json(HealthResponse {
        status: "healthy".to_string(),
        delivered: stats.delivered,
        dropped: stats.dropped,
    })
}
