//! HTTP delivery queue for inbound SMS
//! 入站短信的HTTP投递队列
//!
//! Merged inbound messages are posted to the destination URL configured
//! for the receiving SIM. A small worker pool drains a shared queue;
//! each message gets a bounded number of attempts before it is dropped.
//! 合并后的入站消息会POST到接收SIM配置的目标URL。一个小型工作池消费
//! 共享队列；每条消息在被丢弃前有有限的尝试次数。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::message::RxSmsRequest;

/// Delivery tuning knobs / 投递调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Concurrent delivery workers / 并发投递工作者数量
    pub workers: usize,
    /// Attempts per message before dropping it / 每条消息被丢弃前的尝试次数
    pub attempts: u32,
    /// Delay between attempts, in seconds / 两次尝试之间的延迟（秒）
    pub retry_delay_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            workers: 4,
            attempts: 3,
            retry_delay_secs: 10,
        }
    }
}

/// Snapshot of delivery counters / 投递计数器快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub dropped: u64,
}

struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

pub struct DeliveryQueue {
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<RxSmsRequest>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl DeliveryQueue {
    pub fn new(settings: DeliverySettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters {
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let client = reqwest::Client::new();
        let workers = (0..settings.workers.max(1))
            .map(|i| {
                tokio::spawn(delivery_worker(
                    i,
                    Arc::clone(&rx),
                    client.clone(),
                    settings.clone(),
                    Arc::clone(&counters),
                ))
            })
            .collect();
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            workers: parking_lot::Mutex::new(workers),
            counters,
        }
    }

    /// Queue one message for delivery. Fails once [`stop`](Self::stop)
    /// has been called.
    /// 将一条消息加入投递队列。调用[`stop`](Self::stop)后会失败。
    pub fn enqueue(&self, msg: RxSmsRequest) -> GatewayResult<()> {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(msg).map_err(|_| GatewayError::DeliveryStopped),
            None => Err(GatewayError::DeliveryStopped),
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for the workers to finish what remains.
    /// 关闭队列并等待工作者处理完剩余消息。
    pub async fn stop(&self) {
        self.tx.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        join_all(workers).await;
        let stats = self.stats();
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            "delivery queue stopped"
        );
    }
}

async fn delivery_worker(
    index: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RxSmsRequest>>>,
    client: reqwest::Client,
    settings: DeliverySettings,
    counters: Arc<Counters>,
) {
    debug!(worker = index, "delivery worker started");
    loop {
        // Keep the lock only while waiting, not while posting.
        // 仅在等待时持锁，投递期间不持锁。
        let msg = { rx.lock().await.recv().await };
        let Some(msg) = msg else { break };
        if deliver(&client, &msg, &settings).await {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                sender = %msg.sender_number,
                url = %msg.destination_url,
                "dropping sms after delivery attempts exhausted"
            );
        }
    }
    debug!(worker = index, "delivery worker stopped");
}

async fn deliver(client: &reqwest::Client, msg: &RxSmsRequest, settings: &DeliverySettings) -> bool {
    let tstamp = msg.timestamp.to_rfc3339();
    let params = [
        ("sender", msg.sender_number.as_str()),
        ("recipient", msg.recipient_number.as_str()),
        ("text", msg.text.as_str()),
        ("tstamp", tstamp.as_str()),
    ];
    for attempt in 1..=settings.attempts.max(1) {
        match client
            .post(&msg.destination_url)
            .form(&params)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    sender = %msg.sender_number,
                    url = %msg.destination_url,
                    attempt,
                    "sms delivered"
                );
                return true;
            }
            Ok(resp) => warn!(
                url = %msg.destination_url,
                status = %resp.status(),
                attempt,
                "delivery rejected"
            ),
            Err(e) => warn!(
                url = %msg.destination_url,
                error = %e,
                attempt,
                "delivery request failed"
            ),
        }
        if attempt < settings.attempts {
            tokio::time::sleep(Duration::from_secs(settings.retry_delay_secs)).await;
        }
    }
    false
}
