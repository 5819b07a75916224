//! HTTP routes of the gateway / 网关的HTTP路由
//!
//! This module defines all HTTP routes and their mappings to handlers
//! 此模块定义所有HTTP路由及其到处理器的映射

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{health_check, send_sms, GatewayState};

/// Create HTTP routes / 创建HTTP路由
pub fn create_routes(state: GatewayState) -> Router {
    Router::new()
        // Outbound SMS endpoint / 出站短信端点
        .route("/send_sms", post(send_sms))
        // Health check endpoint / 健康检查端点
        .route("/health", get(health_check))
        .with_state(state)
}
