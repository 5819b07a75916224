//! Persisted SIM configuration store
//! 持久化的SIM配置存储
//!
//! Maps a SIM subscriber identity (imsi) to its routing configuration. The
//! store is owned exclusively by the SIM manager actor; it has no
//! concurrency of its own. Every mutation is persisted immediately with an
//! atomic temp-file-and-rename write, sorted by imsi for deterministic
//! diffs.
//! 将SIM用户标识（imsi）映射到其路由配置。存储由SIM管理器actor独占；
//! 自身没有并发。每次变更都通过临时文件加原子重命名立即持久化，
//! 按imsi排序以保证diff的确定性。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{GatewayError, GatewayResult};

/// Routing configuration of one SIM card / 一张SIM卡的路由配置
///
/// Identity is the imsi, immutable once assigned. Configs are created on
/// first sight of a new SIM and never deleted.
/// 标识是imsi，分配后不可变。配置在首次发现新SIM时创建，永不删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// SIM subscriber identity / SIM用户标识
    pub imsi: String,
    /// Human-readable description / 人类可读的描述
    #[serde(default)]
    pub desc: String,
    /// Phone number assigned to this SIM; unique across configs when set
    /// 分配给此SIM的电话号码；设置时在所有配置中唯一
    pub phone_number: Option<String>,
    /// Destination URL for received SMS / 接收短信的目标URL
    pub url: Option<String>,
    /// Inactive SIMs never reach the hardware / 非活动的SIM不会触及硬件
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SimConfig {
    /// New config with empty description, no number, no URL, active
    /// 新配置：空描述、无号码、无URL、活动状态
    pub fn new(imsi: impl Into<String>) -> Self {
        Self {
            imsi: imsi.into(),
            desc: String::new(),
            phone_number: None,
            url: None,
            active: true,
        }
    }

    /// A worker may enter its operating state only for a startable config
    /// 只有可启动的配置才允许工作者进入运行状态
    pub fn is_startable(&self) -> bool {
        self.phone_number.is_some() && self.url.is_some() && self.active
    }
}

/// Partial update applied through [`SimConfigStore::update`]
/// 通过[`SimConfigStore::update`]应用的部分更新
#[derive(Debug, Clone, Default)]
pub struct SimConfigUpdate {
    pub desc: Option<String>,
    pub phone_number: Option<String>,
    pub url: Option<String>,
    pub active: Option<bool>,
}

/// File-backed imsi → config map / 以文件为后端的imsi → 配置映射
#[derive(Debug)]
pub struct SimConfigStore {
    path: PathBuf,
    configs: HashMap<String, SimConfig>,
}

impl SimConfigStore {
    /// Load the store from `path`; a missing file is an empty store, not an
    /// error.
    /// 从`path`加载存储；文件不存在视为空存储，不是错误。
    pub fn load(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let mut configs = HashMap::new();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let loaded: Vec<SimConfig> = serde_json::from_str(&data)?;
            info!(count = loaded.len(), path = %path.display(), "loaded sim config(s)");
            for config in loaded {
                configs.insert(config.imsi.clone(), config);
            }
        } else {
            info!(path = %path.display(), "sim config file not found, starting empty");
        }
        Ok(Self { path, configs })
    }

    /// Create a config for a newly seen imsi and persist immediately
    /// 为新发现的imsi创建配置并立即持久化
    pub fn add(&mut self, imsi: &str) -> GatewayResult<&SimConfig> {
        debug_assert!(!self.configs.contains_key(imsi));
        self.configs
            .insert(imsi.to_string(), SimConfig::new(imsi));
        self.save()?;
        Ok(&self.configs[imsi])
    }

    /// Apply a partial update to an existing config and persist
    /// 对现有配置应用部分更新并持久化
    pub fn update(&mut self, imsi: &str, update: SimConfigUpdate) -> GatewayResult<SimConfig> {
        if let Some(number) = update.phone_number.as_deref() {
            // At most one config per phone number. / 每个电话号码至多一个配置。
            if let Some(other) = self
                .configs
                .values()
                .find(|c| c.imsi != imsi && c.phone_number.as_deref() == Some(number))
            {
                return Err(GatewayError::PhoneNumberTaken {
                    number: number.to_string(),
                    imsi: other.imsi.clone(),
                });
            }
        }

        let config = self
            .configs
            .get_mut(imsi)
            .ok_or_else(|| GatewayError::SimNotKnown {
                selector: format!("imsi {imsi}"),
            })?;

        if let Some(desc) = update.desc {
            config.desc = desc;
        }
        if let Some(number) = update.phone_number {
            config.phone_number = Some(number);
        }
        if let Some(url) = update.url {
            config.url = Some(url);
        }
        if let Some(active) = update.active {
            config.active = active;
        }
        let updated = config.clone();
        self.save()?;
        Ok(updated)
    }

    pub fn get(&self, imsi: &str) -> Option<&SimConfig> {
        self.configs.get(imsi)
    }

    pub fn contains(&self, imsi: &str) -> bool {
        self.configs.contains_key(imsi)
    }

    /// Look up the config owning a phone number / 查找拥有某电话号码的配置
    pub fn find_by_phone_number(&self, number: &str) -> Option<&SimConfig> {
        self.configs
            .values()
            .find(|c| c.phone_number.as_deref() == Some(number))
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> GatewayResult<()> {
        let mut configs: Vec<&SimConfig> = self.configs.values().collect();
        configs.sort_by(|a, b| a.imsi.cmp(&b.imsi));
        let data = serde_json::to_string_pretty(&configs)?;

        // Write-then-rename keeps the file intact under a crash mid-write.
        // 写入后重命名可以在写入中途崩溃时保持文件完整。
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
