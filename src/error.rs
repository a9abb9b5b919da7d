//! # 错误模块
//!
//! 定义账本状态机中所有可能出现的错误，以及它们到共识回调响应码的映射。

use thiserror::Error;

/// 响应码：接受
pub const CODE_OK: u32 = 0;
/// 响应码：信封或交易无法解码
pub const CODE_ENCODING_ERROR: u32 = 1;
/// 响应码：交易结构非法或授权失败
pub const CODE_INVALID_TRANSACTION: u32 = 2;
/// 响应码：查找的记录不存在（还款查找失败仅在严格模式下使用）
pub const CODE_NOT_FOUND: u32 = 3;
/// 响应码：底层存储失败
pub const CODE_STORE_ERROR: u32 = 4;
/// 响应码：超额还款或金额溢出
pub const CODE_OVERPAYMENT: u32 = 5;
/// 响应码：重复交易，或债务记录的键已被占用
pub const CODE_DUPLICATE: u32 = 6;
/// 响应码：无法识别的命令（仅严格模式）
pub const CODE_UNKNOWN_COMMAND: u32 = 7;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("could not parse {what}: {reason}")]
    Encoding { what: &'static str, reason: String },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("authorization failed for input {index}")]
    Unauthorized { index: usize },

    #[error("debt record not found: {0}")]
    DebtNotFound(String),

    #[error("repayment of {requested} exceeds outstanding balance {outstanding}")]
    Overpayment { outstanding: u64, requested: u64 },

    #[error("aggregate value overflowed")]
    Overflow,

    #[error("transaction {0} already recorded")]
    Duplicate(String),

    #[error("debt record key {0} is already occupied")]
    DebtKeyOccupied(String),

    #[error("corrupt {tree} entry: {reason}")]
    CorruptEntry { tree: &'static str, reason: String },

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("store transaction aborted: {0}")]
    Transaction(String),

    #[error("config error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn encoding(what: &'static str, reason: impl ToString) -> Self {
        LedgerError::Encoding {
            what,
            reason: reason.to_string(),
        }
    }

    /// 将错误映射为返回给共识引擎的响应码
    pub fn code(&self) -> u32 {
        match self {
            LedgerError::Encoding { .. } => CODE_ENCODING_ERROR,
            LedgerError::InvalidTransaction(_) | LedgerError::Unauthorized { .. } => {
                CODE_INVALID_TRANSACTION
            }
            LedgerError::DebtNotFound(_) => CODE_NOT_FOUND,
            LedgerError::Overpayment { .. } | LedgerError::Overflow => CODE_OVERPAYMENT,
            LedgerError::Duplicate(_) | LedgerError::DebtKeyOccupied(_) => CODE_DUPLICATE,
            LedgerError::CorruptEntry { .. }
            | LedgerError::Store(_)
            | LedgerError::Transaction(_)
            | LedgerError::Config(_) => CODE_STORE_ERROR,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
