//! HTTP gateway for the msgbox service / msgbox服务的HTTP网关

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::actor::ActorRef;
use crate::gateway::delivery::DeliveryQueue;
use crate::gateway::handlers::GatewayState;
use crate::gateway::message::Message;
use crate::gateway::routes::create_routes;

/// msgbox HTTP gateway / msgbox HTTP网关
pub struct HttpGateway {
    addr: SocketAddr,
    manager: ActorRef<Message>,
    delivery: Arc<DeliveryQueue>,
}

impl HttpGateway {
    /// Create a new HTTP gateway / 创建新的HTTP网关
    pub fn new(addr: SocketAddr, manager: ActorRef<Message>, delivery: Arc<DeliveryQueue>) -> Self {
        Self {
            addr,
            manager,
            delivery,
        }
    }

    /// Get the HTTP address / 获取HTTP地址
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the HTTP gateway / 启动HTTP网关
    pub async fn start(self) -> Result<()> {
        let state = GatewayState {
            manager: self.manager,
            delivery: self.delivery,
        };
        let app = create_routes(state);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("msgbox HTTP gateway listening on {}", self.addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
