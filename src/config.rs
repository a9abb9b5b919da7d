//! # 配置模块
//!
//! 节点配置从JSON文件加载，每个字段都有默认值；`DEBTCHAIN_DATA_DIR` 环境变量可覆盖数据目录。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::digest::DigestMode;
use crate::error::{LedgerError, LedgerResult};

pub const DATA_DIR_ENV: &str = "DEBTCHAIN_DATA_DIR";

/// UTXO存储的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UtxoKeying {
    /// 按接收者公钥哈希，同一接收者的后一个输出会覆盖前一个
    Recipient,
    /// 按 (交易哈希, 输出索引)，每个输出唯一可寻址
    Outpoint,
}

impl Default for UtxoKeying {
    fn default() -> Self {
        UtxoKeying::Recipient
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 数据库目录
    pub data_dir: PathBuf,
    /// 使用临时数据库，测试和演示使用
    pub temporary: bool,
    pub utxo_keying: UtxoKeying,
    pub commit_digest: DigestMode,
    /// 是否在CheckTx和DeliverTx中校验签名
    pub verify_authorization: bool,
    /// 严格模式：查找失败和未知命令返回非零响应码，发行交易必须带哨兵输入
    pub strict_responses: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_dir: PathBuf::from("data"),
            temporary: false,
            utxo_keying: UtxoKeying::default(),
            commit_digest: DigestMode::default(),
            verify_authorization: false,
            strict_responses: false,
        }
    }
}

impl AppConfig {
    /// 内存中的临时配置
    pub fn temporary() -> Self {
        AppConfig {
            temporary: true,
            ..AppConfig::default()
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            LedgerError::Config(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        let mut config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| LedgerError::Config(format!("invalid config: {}", e)))?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }
}
