//! Shared test doubles for the gateway / 网关的共享测试替身
//!
//! The hardware boundary (`ModemDriver`, `ModemDriverFactory`, `PortScanner`)
//! is scripted here; HTTP delivery targets are captured with a throwaway
//! axum server on an ephemeral port.
//! 硬件边界（`ModemDriver`、`ModemDriverFactory`、`PortScanner`）在这里
//! 被脚本化；HTTP投递目标由临时端口上的一次性axum服务器捕获。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Router};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::message::{ConcatInfo, RxSmsRequest};
use crate::gateway::modem::{
    IncomingSms, ModemDriver, ModemDriverFactory, ModemIdentity, ModemInfo, SmsHook,
};
use crate::gateway::sim::SimConfig;
use crate::gateway::supervisor::PortScanner;

/// Scripted modem driver / 脚本化的调制解调器驱动
pub struct MockModem {
    pub imsi: String,
    /// Next connect attempt succeeds / 下一次连接尝试成功
    pub connect_ok: AtomicBool,
    /// Network probe succeeds / 网络探测成功
    pub network_ok: AtomicBool,
    /// Draining stored SMS succeeds / 排空存储短信成功
    pub drain_ok: AtomicBool,
    /// Sending succeeds / 发送成功
    pub send_ok: AtomicBool,
    /// Every (recipient, text) handed to the hardware / 交给硬件的每个（收件人，正文）
    pub sent: Mutex<Vec<(String, String)>>,
    pub close_calls: AtomicUsize,
    /// Number of network coverage probes issued / 已发出的网络覆盖探测次数
    pub network_probes: AtomicUsize,
}

impl MockModem {
    pub fn new(imsi: &str) -> Arc<Self> {
        Arc::new(Self {
            imsi: imsi.to_string(),
            connect_ok: AtomicBool::new(true),
            network_ok: AtomicBool::new(true),
            drain_ok: AtomicBool::new(true),
            send_ok: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            network_probes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModemDriver for MockModem {
    async fn connect(&self) -> GatewayResult<ModemIdentity> {
        if !self.connect_ok.load(Ordering::SeqCst) {
            return Err(GatewayError::Modem("scripted connect failure".to_string()));
        }
        Ok(ModemIdentity {
            imsi: self.imsi.clone(),
            info: ModemInfo::default(),
        })
    }

    async fn close(&self) -> GatewayResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_sms(&self, recipient: &str, text: &str) -> GatewayResult<()> {
        if !self.send_ok.load(Ordering::SeqCst) {
            return Err(GatewayError::Modem("scripted send failure".to_string()));
        }
        self.sent
            .lock()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }

    async fn wait_for_network_coverage(&self, _timeout: Duration) -> GatewayResult<u32> {
        self.network_probes.fetch_add(1, Ordering::SeqCst);
        if self.network_ok.load(Ordering::SeqCst) {
            Ok(21)
        } else {
            Err(GatewayError::Modem("scripted coverage failure".to_string()))
        }
    }

    async fn drain_stored_sms(&self) -> GatewayResult<()> {
        if self.drain_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Modem("scripted drain failure".to_string()))
        }
    }
}

/// Factory with pre-registered mock modems; captures the inbound hook of
/// each built driver so tests can inject received SMS.
/// 预注册模拟调制解调器的工厂；捕获每个已构建驱动的入站回调，使测试可以
/// 注入接收到的短信。
#[derive(Default)]
pub struct MockModemFactory {
    modems: Mutex<HashMap<String, Arc<MockModem>>>,
    hooks: Mutex<HashMap<String, SmsHook>>,
}

impl MockModemFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, device: &str, modem: Arc<MockModem>) {
        self.modems.lock().insert(device.to_string(), modem);
    }

    /// The hook installed for `device`, once a worker was spawned for it
    /// `device`安装的回调，在其工作者被启动之后存在
    pub fn hook(&self, device: &str) -> Option<SmsHook> {
        self.hooks.lock().get(device).cloned()
    }

    /// Feed one inbound SMS through the captured hook
    /// 通过捕获的回调注入一条入站短信
    pub fn inject_sms(&self, device: &str, sender: &str, text: &str, concat: Option<ConcatInfo>) {
        let hook = self.hook(device).expect("no hook captured for device");
        hook(IncomingSms {
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            concat,
        });
    }
}

impl ModemDriverFactory for MockModemFactory {
    fn build(&self, device: &str, hook: SmsHook) -> Arc<dyn ModemDriver> {
        self.hooks.lock().insert(device.to_string(), hook);
        let modem = self
            .modems
            .lock()
            .entry(device.to_string())
            .or_insert_with(|| MockModem::new(&format!("imsi-{device}")))
            .clone();
        modem
    }
}

/// Scanner returning a scripted device list / 返回脚本化设备列表的扫描器
#[derive(Default)]
pub struct MockScanner {
    pub devices: Mutex<Vec<String>>,
}

impl MockScanner {
    pub fn with_devices(devices: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices.iter().map(|d| d.to_string()).collect()),
        })
    }
}

impl PortScanner for MockScanner {
    fn scan(&self) -> Vec<String> {
        self.devices.lock().clone()
    }
}

/// A config that lets a worker go straight to serving traffic
/// 让工作者直接进入服务状态的配置
pub fn startable_config(imsi: &str, phone: &str, url: &str) -> SimConfig {
    SimConfig {
        imsi: imsi.to_string(),
        desc: String::new(),
        phone_number: Some(phone.to_string()),
        url: Some(url.to_string()),
        active: true,
    }
}

/// A fully populated inbound message / 完整填充的入站消息
pub fn make_rx(sender: &str, text: &str, url: &str, concat: Option<ConcatInfo>) -> RxSmsRequest {
    RxSmsRequest {
        sender_number: sender.to_string(),
        recipient_number: "+490000".to_string(),
        text: text.to_string(),
        timestamp: Utc::now(),
        destination_url: url.to_string(),
        concat_info: concat,
    }
}

/// Spin up a server that records every form POST and answers `status`.
/// Returns the target URL and the stream of captured forms.
/// 启动一个记录每个表单POST并以`status`应答的服务器。返回目标URL和
/// 捕获表单的流。
pub async fn capture_server(
    status: StatusCode,
) -> (String, mpsc::UnboundedReceiver<HashMap<String, String>>) {
    scripted_capture_server(vec![status]).await
}

/// Like [`capture_server`], but answers the n-th POST with the n-th status
/// of `script`, repeating the last entry once the script runs out.
/// 类似[`capture_server`]，但第n个POST以`script`的第n个状态应答，
/// 脚本用尽后重复最后一项。
pub async fn scripted_capture_server(
    script: Vec<StatusCode>,
) -> (String, mpsc::UnboundedReceiver<HashMap<String, String>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/inbound",
        post(move |Form(form): Form<HashMap<String, String>>| {
            let tx = tx.clone();
            let hits = Arc::clone(&hits);
            let script = script.clone();
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(form);
                *script
                    .get(n)
                    .or(script.last())
                    .unwrap_or(&StatusCode::OK)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind capture server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/inbound"), rx)
}
