//! Reassembly pool for multipart inbound SMS
//! 多段入站短信的重组池
//!
//! Parts of a concatenated SMS are grouped by sender, receiving SIM and
//! concat reference. A complete group merges into one message in sequence
//! order. A background sweeper force-merges groups older than the concat
//! timeout, rendering parts that never arrived as a gap marker, and posts
//! the result back to the owning worker's mailbox.
//! 串联短信的分段按发送方、接收SIM和串联引用分组。集齐的分组按序号顺序
//! 合并为一条消息。后台清扫任务会强制合并超过串联超时的分组，将从未到达
//! 的分段渲染为占位标记，并把结果投回所属工作者的邮箱。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actor::ActorRef;
use crate::gateway::message::{Message, RxSmsRequest};

/// Placeholder for a part that never arrived / 从未到达的分段的占位符
pub const GAP_MARKER: &str = "<missing part>";

/// How long an incomplete group is kept / 不完整分组的保留时长
pub const CONCAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Sweeper wakeup interval / 清扫任务的唤醒间隔
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    sender_number: String,
    recipient_number: String,
    reference: u16,
}

struct Group {
    total_parts: u8,
    /// Arrived parts, keyed by 1-based sequence number
    /// 已到达的分段，以1为起点的序号为键
    parts: BTreeMap<u8, RxSmsRequest>,
    created: Instant,
}

impl Group {
    fn is_complete(&self) -> bool {
        self.parts.len() as u8 >= self.total_parts
    }

    /// Join the parts in sequence order, filling gaps with [`GAP_MARKER`].
    /// The merged message takes its metadata from the earliest part and
    /// carries no concat info of its own.
    /// 按序号顺序拼接分段，空缺处填入[`GAP_MARKER`]。合并消息的元数据取自
    /// 最早的分段，并且自身不携带串联信息。
    fn merge(mut self) -> Option<RxSmsRequest> {
        let total = self.total_parts;
        let first_seq = *self.parts.keys().next()?;
        let mut merged = self.parts.remove(&first_seq)?;
        let mut text = String::new();
        for seq in 1..=total {
            if seq == first_seq {
                text.push_str(&merged.text);
            } else if let Some(part) = self.parts.remove(&seq) {
                text.push_str(&part.text);
                if part.timestamp < merged.timestamp {
                    merged.timestamp = part.timestamp;
                }
            } else {
                text.push_str(GAP_MARKER);
            }
        }
        merged.text = text;
        merged.concat_info = None;
        Some(merged)
    }
}

pub struct ConcatPool {
    groups: Arc<Mutex<HashMap<GroupKey, Group>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConcatPool {
    /// Pool whose forced merges go back to `owner` as `RxSms`
    /// 强制合并结果以`RxSms`投回`owner`的池
    pub fn new(owner: ActorRef<Message>) -> Self {
        Self::with_timing(owner, CONCAT_TIMEOUT, SWEEP_INTERVAL)
    }

    /// Pool with explicit timing, used by tests. / 显式指定时序的池，测试用。
    pub fn with_timing(owner: ActorRef<Message>, timeout: Duration, interval: Duration) -> Self {
        let groups: Arc<Mutex<HashMap<GroupKey, Group>>> = Arc::new(Mutex::new(HashMap::new()));
        let sweeper = {
            let groups = Arc::clone(&groups);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    for merged in expire_groups(&groups, timeout) {
                        info!(
                            sender = %merged.sender_number,
                            "concat group timed out, merged with gaps"
                        );
                        if owner.send(Message::RxSms(merged)).is_err() {
                            // Owner is shutting down; its drain loop logs
                            // anything it no longer wants.
                            // 所有者正在关闭；它的排空循环会记录不再需要的消息。
                            return;
                        }
                    }
                }
            })
        };
        Self {
            groups,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Route one inbound message through the pool. A message without concat
    /// info, or one that completes its group, comes back merged; `None`
    /// means the part was absorbed and the group is still waiting.
    /// 将一条入站消息送入池中。不带串联信息的消息或使分组集齐的消息会以
    /// 合并形式返回；`None`表示分段已被吸收，分组仍在等待。
    pub fn merge(&self, msg: RxSmsRequest) -> Option<RxSmsRequest> {
        let Some(concat) = msg.concat_info else {
            return Some(msg);
        };

        let key = GroupKey {
            sender_number: msg.sender_number.clone(),
            recipient_number: msg.recipient_number.clone(),
            reference: concat.reference,
        };
        // A declared total below the part's own sequence number would merge
        // to text with the part itself missing; clamp it at ingest.
        // 声明的总数低于分段自身序号时，合并结果会缺失该分段本身；
        // 在入池时收紧。
        let total_parts = concat.total_parts.max(concat.seq).max(1);
        let complete = {
            let mut groups = self.groups.lock();
            let group = groups.entry(key.clone()).or_insert_with(|| Group {
                total_parts,
                parts: BTreeMap::new(),
                created: Instant::now(),
            });
            if group.total_parts != total_parts {
                warn!(
                    sender = %key.sender_number,
                    reference = concat.reference,
                    expected = group.total_parts,
                    got = total_parts,
                    "conflicting part count for concat group"
                );
            }
            if group.parts.insert(concat.seq, msg).is_some() {
                debug!(
                    sender = %key.sender_number,
                    reference = concat.reference,
                    seq = concat.seq,
                    "duplicate concat part replaced"
                );
            }
            if group.is_complete() {
                groups.remove(&key)
            } else {
                None
            }
        };
        complete.and_then(Group::merge)
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// Abort the background sweeper. Pending incomplete groups are
    /// discarded with the pool.
    /// 中止后台清扫任务。未完成的分组随池一起丢弃。
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn expire_now(&self) -> Vec<RxSmsRequest> {
        expire_groups(&self.groups, Duration::ZERO)
    }
}

fn expire_groups(
    groups: &Mutex<HashMap<GroupKey, Group>>,
    timeout: Duration,
) -> Vec<RxSmsRequest> {
    let expired: Vec<Group> = {
        let mut groups = groups.lock();
        let keys: Vec<GroupKey> = groups
            .iter()
            .filter(|(_, g)| g.created.elapsed() >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter().filter_map(|k| groups.remove(&k)).collect()
    };
    expired.into_iter().filter_map(Group::merge).collect()
}
