//! Gateway service configuration / 网关服务配置

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::config::{LogConfig, ServerConfig};
use crate::gateway::delivery::DeliverySettings;

/// msgbox command line arguments / msgbox命令行参数
#[derive(Parser, Debug, Clone)]
#[command(
    name = "msgbox",
    version = "0.1.0",
    about = "msgbox - GSM modem to HTTP SMS gateway\nmsgbox - GSM调制解调器到HTTP的短信网关",
    long_about = "msgbox bridges attached GSM modems and HTTP: outbound SMS via POST /send_sms, inbound SMS delivered to per-SIM URLs.\nmsgbox桥接连接的GSM调制解调器与HTTP：出站短信通过POST /send_sms发送，入站短信投递到各SIM配置的URL。"
)]
pub struct CliArgs {
    /// Configuration file path / 配置文件路径
    #[arg(short, long, value_name = "FILE", help = "Configuration file path / 配置文件路径")]
    pub config: Option<String>,

    /// HTTP gateway address / HTTP网关地址
    #[arg(long, value_name = "ADDR", help = "HTTP gateway address (e.g., 127.0.0.1:8888) / HTTP网关地址")]
    pub http_addr: Option<String>,

    /// SIM config store path / SIM配置存储路径
    #[arg(long, value_name = "PATH", help = "SIM config store path / SIM配置存储路径")]
    pub store_path: Option<String>,

    /// Only consider USB serial devices / 仅考虑USB串口设备
    #[arg(long, help = "Only consider USB serial devices / 仅考虑USB串口设备")]
    pub usb_only: bool,

    /// Enable debug logging / 启用调试日志
    #[arg(long, help = "Enable debug logging / 启用调试日志")]
    pub debug: bool,

    /// Log level / 日志级别
    #[arg(long, value_name = "LEVEL", help = "Log level (trace, debug, info, warn, error) / 日志级别", conflicts_with = "debug")]
    pub log_level: Option<String>,
}

/// msgbox service configuration / msgbox服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP gateway configuration / HTTP网关配置
    pub http: ServerConfig,
    /// Logging configuration / 日志配置
    pub log: LogConfig,
    /// SIM config store path / SIM配置存储路径
    pub store_path: PathBuf,
    /// Only consider USB serial devices / 仅考虑USB串口设备
    pub usb_only: bool,
    /// Delivery queue configuration / 投递队列配置
    pub delivery: DeliverySettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http: ServerConfig::default(),
            log: LogConfig::default(),
            store_path: default_store_path(),
            usb_only: false,
            delivery: DeliverySettings::default(),
        }
    }
}

/// `~/.msgboxrc`, or a relative fallback when HOME is unset
/// `~/.msgboxrc`，HOME未设置时退回相对路径
fn default_store_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".msgboxrc"),
        None => PathBuf::from(".msgboxrc"),
    }
}

impl GatewayConfig {
    /// Load configuration with CLI arguments override / 使用CLI参数覆盖加载配置
    pub fn load_with_cli(args: &CliArgs) -> anyhow::Result<Self> {
        // Start with default configuration / 从默认配置开始
        let mut config = Self::default();

        // Load from CLI-provided path if any / 如有命令行提供的路径则从中加载
        if let Some(config_path) = &args.config {
            let p = PathBuf::from(config_path);
            if p.exists() {
                let cfg = std::fs::read_to_string(&p)?;
                config = toml::from_str(&cfg)?;
            } else {
                tracing::info!("Config file '{}' not found, using defaults", config_path);
            }
        }

        // Override with CLI arguments / 使用CLI参数覆盖
        if let Some(http_addr) = &args.http_addr {
            config.http.addr = http_addr.parse()?;
        }
        if let Some(store_path) = &args.store_path {
            config.store_path = PathBuf::from(store_path);
        }
        if args.usb_only {
            config.usb_only = true;
        }
        if args.debug {
            config.log.level = "debug".to_string();
        } else if let Some(log_level) = &args.log_level {
            config.log.level = log_level.clone();
        }

        Ok(config)
    }
}
