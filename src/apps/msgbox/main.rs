//! msgbox main entry point / msgbox主入口点

use std::sync::Arc;

use clap::Parser;
use msgbox::config::init_tracing;
use msgbox::gateway::config::{CliArgs, GatewayConfig};
use msgbox::gateway::delivery::DeliveryQueue;
use msgbox::gateway::http_gateway::HttpGateway;
use msgbox::gateway::manager::SimManager;
use msgbox::gateway::modem::SerialAtModemFactory;
use msgbox::gateway::sim::SimConfigStore;
use msgbox::gateway::supervisor::{SerialPortSupervisor, SystemPortScanner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments / 解析命令行参数
    let args = CliArgs::parse();

    // Store args values for logging before they are moved / 在参数被移动之前存储参数值用于日志记录
    let log_args = format!("{:?}", args);

    let config = GatewayConfig::load_with_cli(&args)?;

    // Initialize logging with configuration / 使用配置初始化日志
    init_tracing(&config.log)?;

    tracing::info!("Starting msgbox gateway with args: {}", log_args);
    tracing::info!("msgbox gateway starting with:");
    tracing::info!("  - HTTP gateway on: {}", config.http.addr);
    tracing::info!("  - SIM config store: {}", config.store_path.display());
    tracing::info!("  - USB only: {}", config.usb_only);

    // Delivery queue for received SMS / 已接收短信的投递队列
    let delivery = Arc::new(DeliveryQueue::new(config.delivery.clone()));

    // SIM manager over the persisted config store / 基于持久化配置存储的SIM管理器
    let store = SimConfigStore::load(&config.store_path)?;
    let manager = SimManager::start(store);

    // Serial port supervisor spawning modem workers / 串口监督者，负责启动调制解调器工作者
    let scanner = Arc::new(SystemPortScanner::new(config.usb_only));
    let factory = Arc::new(SerialAtModemFactory::default());
    let supervisor = SerialPortSupervisor::start(
        scanner,
        factory,
        manager.actor_ref(),
        Arc::clone(&delivery),
    );

    // HTTP gateway / HTTP网关
    let http_gateway = HttpGateway::new(config.http.addr, manager.actor_ref(), Arc::clone(&delivery));
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_gateway.start().await {
            tracing::error!("HTTP gateway error: {}", e);
        }
    });

    tracing::info!("msgbox gateway started successfully");
    tracing::info!("HTTP gateway: http://{}", config.http.addr);

    // Wait for shutdown signal / 等待关闭信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("msgbox gateway shutting down");

    // Graceful shutdown: no new HTTP work, stop the device side, wait for
    // the manager to drain, then let the delivery queue finish.
    // 优雅关闭：不再接受新的HTTP工作，先停止设备侧，等待管理器排空，
    // 最后让投递队列完成收尾。
    http_handle.abort();
    supervisor.stop();
    manager.stop().await;
    delivery.stop().await;

    tracing::info!("msgbox gateway stopped");
    Ok(())
}
