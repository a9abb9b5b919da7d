//! # 交易模块
//!
//! 定义账本中的基本数据结构：交易、交易输入、交易输出以及锁定/解锁脚本。
//!
//! 交易一经构造即不可变，所有函数都是纯函数。交易的身份是其规范JSON序列化的SHA-256哈希，
//! 字段顺序必须在所有实现之间保持一致，否则各副本计算出的哈希不会相同。

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::codec::{bigint_number, bytes_b64};
use crate::error::{LedgerError, LedgerResult};

/// 债务发行证明输入的哨兵索引
pub const DEBT_ISSUANCE_INDEX: i64 = -2;

/// 锁定脚本，记录接收者的公钥哈希
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockingScript {
    #[serde(rename = "PubKHash", with = "bytes_b64")]
    pub recipient_key_hash: Vec<u8>,
}

/// 交易输出结构，表示支付给某个公钥哈希持有者的金额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// 输出金额
    #[serde(rename = "Value")]
    pub value: u64,
    /// 锁定脚本，包含接收者的公钥哈希
    #[serde(rename = "SciptPubKey")]
    pub locking_script: LockingScript,
}

/// ECDSA签名的(R, S)分量
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EcdsaSignature {
    #[serde(rename = "R", with = "bigint_number")]
    pub r: BigUint,
    #[serde(rename = "S", with = "bigint_number")]
    pub s: BigUint,
}

/// 解锁脚本，携带公钥和签名
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnlockingScript {
    #[serde(rename = "PublicKey", with = "bytes_b64")]
    pub public_key: Vec<u8>,
    #[serde(rename = "Signature")]
    pub signature: EcdsaSignature,
}

/// 交易输入结构
///
/// `reference` 是之前交易的哈希，或者在债务发行证明中是债权人的身份公钥。
/// `output_index` 非负时表示花费被引用交易的对应输出，等于 [`DEBT_ISSUANCE_INDEX`] 时表示债务发行证明。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(rename = "Txid", with = "bytes_b64")]
    pub reference: Vec<u8>,
    #[serde(rename = "Vout")]
    pub output_index: i64,
    #[serde(rename = "ScriptSig")]
    pub unlocking_script: UnlockingScript,
}

/// 交易结构，包含有序的输入和输出列表
///
/// 不包含版本号、计数器或锁定时间字段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "Inputs", default)]
    pub inputs: Vec<TxInput>,
    #[serde(rename = "Outputs", default)]
    pub outputs: Vec<TxOutput>,
}

impl TxOutput {
    /// 创建支付给指定公钥哈希的输出
    pub fn new(recipient_key_hash: &[u8], value: u64) -> Self {
        TxOutput {
            value,
            locking_script: LockingScript {
                recipient_key_hash: recipient_key_hash.to_vec(),
            },
        }
    }

    pub fn recipient(&self) -> &[u8] {
        &self.locking_script.recipient_key_hash
    }

    pub fn serialize(&self) -> Vec<u8> {
        canonical_json(self)
    }

    pub fn deserialize(bytes: &[u8]) -> LedgerResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::encoding("output", e))
    }
}

impl TxInput {
    /// 创建债务发行证明输入
    pub fn debt_attestation(creditor_key: &[u8], unlocking_script: UnlockingScript) -> Self {
        TxInput {
            reference: creditor_key.to_vec(),
            output_index: DEBT_ISSUANCE_INDEX,
            unlocking_script,
        }
    }

    pub fn is_debt_attestation(&self) -> bool {
        self.output_index == DEBT_ISSUANCE_INDEX
    }
}

impl Transaction {
    /// 创建新的交易
    ///
    /// # 参数
    ///
    /// * `inputs` - 交易输入列表
    /// * `outputs` - 交易输出列表
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Transaction { inputs, outputs }
    }

    /// 规范序列化：输入在前、输出在后，每个结构的字段按声明顺序排列
    pub fn serialize(&self) -> Vec<u8> {
        canonical_json(self)
    }

    pub fn deserialize(bytes: &[u8]) -> LedgerResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::encoding("transaction", e))
    }

    /// 计算交易哈希，即规范序列化的SHA-256
    pub fn hash(&self) -> Vec<u8> {
        sha256(&self.serialize())
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// 签名消息的哈希：所有签名置零后的规范序列化的SHA-256
    pub fn signing_hash(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        for input in &mut unsigned.inputs {
            input.unlocking_script.signature = EcdsaSignature::default();
        }
        unsigned.hash()
    }

    /// 结构检查：输入数量必须等于输出数量
    pub fn is_well_formed(&self) -> bool {
        self.inputs.len() == self.outputs.len()
    }

    /// 恰好一个输入且其索引为哨兵值时，该交易是债务发行交易
    pub fn is_debt_issuance(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_debt_attestation()
    }

    /// 所有输出金额之和；溢出时饱和，仅用于展示
    pub fn total_output_value(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, output| acc.saturating_add(output.value))
    }

    /// 从发行交易派生未偿债务记录：丢弃输入，保留输出
    pub fn outstanding_debt_record(&self) -> Transaction {
        Transaction {
            inputs: Vec::new(),
            outputs: self.outputs.clone(),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transaction {}", self.hash_hex())?;
        writeln!(f, "Num Inputs: {}", self.inputs.len())?;
        for input in &self.inputs {
            writeln!(
                f,
                "  Txid: {} Vout: {}",
                hex::encode(&input.reference),
                input.output_index
            )?;
        }
        writeln!(f, "Num Outputs: {}", self.outputs.len())?;
        for output in &self.outputs {
            writeln!(
                f,
                "  Value: {} ScriptPubKey: {}",
                output.value,
                hex::encode(output.recipient())
            )?;
        }
        Ok(())
    }
}

pub fn sha256(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

fn canonical_json<T: Serialize>(value: &T) -> Vec<u8> {
    // 仅包含字符串、整数和序列的结构体序列化不会失败
    serde_json::to_vec(value).unwrap_or_default()
}
