//! # 记账模块
//!
//! 债务发行、还款对账以及全量汇总查询。所有写入都进入调用方提供的暂存视图，
//! 出错时调用方丢弃视图即可，不会留下部分写入。

use log::debug;

use crate::config::UtxoKeying;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{Collection, StagedView};
use crate::transaction::{Transaction, TxOutput};

/// 一次还款之后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepaymentReceipt {
    /// 债务记录的新键，下一次还款应引用它
    pub record_key: Vec<u8>,
    /// 该记录的剩余余额
    pub remaining: u64,
    /// 系统债务总额
    pub total_debt: u64,
}

/// UTXO存储中某个输出的键
pub fn utxo_key(tx_hash: &[u8], index: usize, output: &TxOutput, keying: UtxoKeying) -> Vec<u8> {
    match keying {
        UtxoKeying::Recipient => output.recipient().to_vec(),
        UtxoKeying::Outpoint => {
            let mut key = tx_hash.to_vec();
            key.extend_from_slice(&(index as u32).to_be_bytes());
            key
        }
    }
}

/// 应用债务发行交易
///
/// 交易追加到账本存储，每个输出写入UTXO存储，派生的未偿债务记录以发行输入的引用为键写入债务存储。
/// 同一引用下已有未偿记录时拒绝发行，旧记录不会被覆盖。
///
/// # 返回值
///
/// 返回更新后的系统信用总额
pub fn apply_issuance(
    view: &mut StagedView<'_>,
    tx: &Transaction,
    keying: UtxoKeying,
) -> LedgerResult<u64> {
    if !tx.is_well_formed() {
        return Err(LedgerError::InvalidTransaction(format!(
            "{} inputs but {} outputs",
            tx.inputs.len(),
            tx.outputs.len()
        )));
    }
    let issuer = tx
        .inputs
        .first()
        .ok_or_else(|| LedgerError::InvalidTransaction("issuance has no inputs".to_string()))?;

    let tx_hash = record_in_ledger(view, tx)?;
    ensure_vacant(view, &issuer.reference)?;

    for (index, output) in tx.outputs.iter().enumerate() {
        let key = utxo_key(&tx_hash, index, output, keying);
        view.put(Collection::Utxo, &key, output.serialize());
    }

    let record = tx.outstanding_debt_record();
    view.put(Collection::Debt, &issuer.reference, record.serialize());
    debug!(
        "issued {} against reference {}",
        record.total_output_value(),
        hex::encode(&issuer.reference)
    );

    aggregate_credits(view)
}

/// 应用还款交易
///
/// 以第一个输入的引用查找债务记录，扣减第一个输出的金额，删除旧记录并以新哈希重新写入。
/// 还款不会产生新的UTXO。新哈希已被另一条记录占用时拒绝还款。
pub fn apply_repayment(view: &mut StagedView<'_>, tx: &Transaction) -> LedgerResult<RepaymentReceipt> {
    let (input, payment) = match (tx.inputs.first(), tx.outputs.first()) {
        (Some(input), Some(payment)) => (input, payment),
        _ => {
            return Err(LedgerError::InvalidTransaction(
                "repayment needs at least one input and one output".to_string(),
            ))
        }
    };

    record_in_ledger(view, tx)?;

    let raw = view
        .get(Collection::Debt, &input.reference)?
        .ok_or_else(|| LedgerError::DebtNotFound(hex::encode(&input.reference)))?;
    let mut record = decode_entry(Collection::Debt, &raw)?;
    let outstanding = record
        .outputs
        .first()
        .map(|output| output.value)
        .ok_or_else(|| LedgerError::CorruptEntry {
            tree: Collection::Debt.name(),
            reason: "debt record has no outputs".to_string(),
        })?;

    if payment.value > outstanding {
        return Err(LedgerError::Overpayment {
            outstanding,
            requested: payment.value,
        });
    }
    let remaining = outstanding - payment.value;
    record.outputs[0].value = remaining;

    let record_key = record.hash();
    if record_key != input.reference {
        ensure_vacant(view, &record_key)?;
    }
    view.delete(Collection::Debt, &input.reference);
    view.put(Collection::Debt, &record_key, record.serialize());

    let total_debt = aggregate_debt(view)?;
    Ok(RepaymentReceipt {
        record_key,
        remaining,
        total_debt,
    })
}

/// UTXO存储中所有输出金额之和
pub fn aggregate_credits(view: &StagedView<'_>) -> LedgerResult<u64> {
    let mut total = 0u64;
    for (_, raw) in view.scan(Collection::Utxo)? {
        let output = TxOutput::deserialize(&raw).map_err(|e| LedgerError::CorruptEntry {
            tree: Collection::Utxo.name(),
            reason: e.to_string(),
        })?;
        total = total.checked_add(output.value).ok_or(LedgerError::Overflow)?;
    }
    Ok(total)
}

/// 债务存储中所有剩余余额之和
pub fn aggregate_debt(view: &StagedView<'_>) -> LedgerResult<u64> {
    let mut total = 0u64;
    for (_, raw) in view.scan(Collection::Debt)? {
        let record = decode_entry(Collection::Debt, &raw)?;
        for output in &record.outputs {
            total = total.checked_add(output.value).ok_or(LedgerError::Overflow)?;
        }
    }
    Ok(total)
}

/// 追加到账本存储；已存在相同哈希的交易视为重放
fn record_in_ledger(view: &mut StagedView<'_>, tx: &Transaction) -> LedgerResult<Vec<u8>> {
    let tx_hash = tx.hash();
    if view.contains(Collection::Ledger, &tx_hash)? {
        return Err(LedgerError::Duplicate(hex::encode(&tx_hash)));
    }
    view.put(Collection::Ledger, &tx_hash, tx.serialize());
    Ok(tx_hash)
}

fn ensure_vacant(view: &StagedView<'_>, key: &[u8]) -> LedgerResult<()> {
    if view.contains(Collection::Debt, key)? {
        return Err(LedgerError::DebtKeyOccupied(hex::encode(key)));
    }
    Ok(())
}

fn decode_entry(collection: Collection, raw: &[u8]) -> LedgerResult<Transaction> {
    Transaction::deserialize(raw).map_err(|e| LedgerError::CorruptEntry {
        tree: collection.name(),
        reason: e.to_string(),
    })
}
