//! Shared configuration structures for the msgbox gateway
//! msgbox网关的共享配置结构
//!
//! This module provides the base configuration pieces used by the gateway
//! service: server bind address, logging configuration and the tracing
//! initialization helper.
//! 此模块提供网关服务使用的基础配置组件：服务器绑定地址、日志配置
//! 以及tracing初始化辅助函数。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Base HTTP server configuration / 基础HTTP服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address / 服务器绑定地址
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8888".parse().expect("static addr"),
        }
    }
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Logging configuration / 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error) / 日志级别
    pub level: String,
    /// Log format (json, compact, pretty) / 日志格式
    pub format: String,
    /// Optional log output file / 可选的日志输出文件
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            file: None,
        }
    }
}

static FILE_LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialize tracing based on the logging configuration
/// 基于日志配置初始化tracing
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.level.trim().is_empty() {
            EnvFilter::new("info")
        } else {
            EnvFilter::new(config.level.clone())
        }
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let file_writer = match config.file.as_ref() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir: {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            let (file_writer, guard) = tracing_appender::non_blocking(file);
            let _ = FILE_LOG_GUARD.set(guard);
            Some(file_writer)
        }
        None => None,
    };

    // The file layer is always compact; stdout follows the configured format.
    // 文件层始终使用compact格式；标准输出遵循配置的格式。
    macro_rules! stdout_layer {
        ($fmt:ident) => {
            tracing_subscriber::fmt::layer()
                .$fmt()
                .with_target(true)
                .with_level(true)
        };
    }

    match (config.format.as_str(), file_writer) {
        ("json", Some(writer)) => {
            let file_layer = stdout_layer!(compact).with_writer(writer);
            registry.with(stdout_layer!(json)).with(file_layer).init();
        }
        ("pretty", Some(writer)) => {
            let file_layer = stdout_layer!(compact).with_writer(writer);
            registry.with(stdout_layer!(pretty)).with(file_layer).init();
        }
        (_, Some(writer)) => {
            let file_layer = stdout_layer!(compact).with_writer(writer);
            registry.with(stdout_layer!(compact)).with(file_layer).init();
        }
        ("json", None) => registry.with(stdout_layer!(json)).init(),
        ("pretty", None) => registry.with(stdout_layer!(pretty)).init(),
        (_, None) => registry.with(stdout_layer!(compact)).init(),
    }

    Ok(())
}
