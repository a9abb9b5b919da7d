//! # 命令信封模块
//!
//! 提交给共识引擎的基本单元：在编码后的交易外包裹命令类型和路由地址。

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::codec;
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::Transaction;

pub const ISSUE_DEBT: &str = "IssueDebt";
pub const REPAYMENT: &str = "Repayment";

/// 命令类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    IssueDebt,
    Repayment,
    /// 无法识别的命令，保留原始文本用于日志
    Unrecognized(String),
}

/// 命令信封：`{Command, Address, Transaction}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    /// base64-url编码的交易JSON
    #[serde(rename = "Transaction", default)]
    pub transaction: String,
}

impl CommandKind {
    pub fn parse(text: &str) -> Self {
        match text {
            ISSUE_DEBT => CommandKind::IssueDebt,
            REPAYMENT => CommandKind::Repayment,
            other => CommandKind::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::IssueDebt => ISSUE_DEBT,
            CommandKind::Repayment => REPAYMENT,
            CommandKind::Unrecognized(other) => other,
        }
    }
}

impl Command {
    /// 将交易包装为命令信封
    pub fn wrap(kind: CommandKind, address: &str, tx: &Transaction) -> Self {
        Command {
            command: kind.as_str().to_string(),
            address: address.to_string(),
            transaction: codec::encode_url(&tx.serialize()),
        }
    }

    pub fn kind(&self) -> CommandKind {
        CommandKind::parse(&self.command)
    }

    /// 解码共识引擎交付的原始信封字节
    pub fn decode(raw: &[u8]) -> LedgerResult<Self> {
        serde_json::from_slice(raw).map_err(|e| LedgerError::encoding("command JSON", e))
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// 解码内层交易；base64错误和JSON错误都视为编码错误
    pub fn transaction(&self) -> LedgerResult<Transaction> {
        let bytes = codec::decode_url(&self.transaction)
            .map_err(|e| LedgerError::encoding("transaction base64", e))?;
        Transaction::deserialize(&bytes)
    }

    /// 构造 `broadcast_tx_commit` 的JSON-RPC请求体
    pub fn broadcast_body(&self, id: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "broadcast_tx_commit",
            "params": { "tx": codec::encode_url(&self.encode()) },
        })
        .to_string()
    }
}
