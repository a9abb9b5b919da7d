//! # 状态机模块
//!
//! 由外部共识引擎驱动的每区块生命周期：`BeginBlock` → 按最终顺序逐笔 `DeliverTx` → `EndBlock` → `Commit`，
//! 以及独立的准入检查 `CheckTx` 和查询接口。
//!
//! 共识引擎保证所有回调严格串行，且在每个正确副本上顺序相同，这是各副本状态一致的唯一依据，
//! 因此状态机内部不做任何并发控制。

use log::{debug, info, warn};

use crate::auth::{authorize_transaction, AcceptAll, Authorizer, Secp256k1Authorizer};
use crate::bookkeeping;
use crate::config::AppConfig;
use crate::digest::{chain_app_hash, legacy_height_digest, DigestMode};
use crate::envelope::{Command, CommandKind};
use crate::error::{
    LedgerError, LedgerResult, CODE_INVALID_TRANSACTION, CODE_NOT_FOUND, CODE_OK,
    CODE_UNKNOWN_COMMAND,
};
use crate::store::{StagedView, Stores, WriteSet, META_APP_HASH, META_HEIGHT};
use crate::transaction::Transaction;

/// CheckTx / DeliverTx 的响应
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxResponse {
    /// 0 表示接受，非零表示拒绝
    pub code: u32,
    pub log: String,
    pub info: String,
    pub data: Vec<u8>,
    pub gas_wanted: i64,
}

impl TxResponse {
    fn ok(info: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        TxResponse {
            code: CODE_OK,
            info: info.into(),
            data: data.into(),
            gas_wanted: 1,
            ..TxResponse::default()
        }
    }

    fn reject(code: u32, info: impl Into<String>, log: impl Into<String>) -> Self {
        TxResponse {
            code,
            log: log.into(),
            info: info.into(),
            gas_wanted: 1,
            ..TxResponse::default()
        }
    }

    fn from_error(err: &LedgerError) -> Self {
        TxResponse::reject(err.code(), format!("error: {}", err), err.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseCommit {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    pub last_block_height: i64,
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestQuery {
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseQuery {
    pub code: u32,
    pub log: String,
    pub value: Vec<u8>,
}

/// 区块生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    Idle,
    BlockOpen,
    BlockClosed,
}

/// 共识回调协议
pub trait Application {
    fn info(&self) -> ResponseInfo;
    fn begin_block(&mut self);
    fn check_tx(&self, raw: &[u8]) -> TxResponse;
    fn deliver_tx(&mut self, raw: &[u8]) -> TxResponse;
    fn end_block(&mut self, height: i64);
    fn commit(&mut self) -> LedgerResult<ResponseCommit>;
    fn query(&self, request: &RequestQuery) -> ResponseQuery;
}

/// 债务账本状态机
///
/// 高度、区块交易哈希累加器和区块写集合都是实例自身的状态，初始为高度0和空存储。
pub struct DebtLedgerApp {
    stores: Stores,
    config: AppConfig,
    authorizer: Box<dyn Authorizer>,
    pending: WriteSet,
    block_hashes: Vec<Vec<u8>>,
    height: i64,
    last_height: i64,
    last_app_hash: Vec<u8>,
    phase: BlockPhase,
}

impl DebtLedgerApp {
    /// 根据配置打开存储并创建状态机
    pub fn new(config: AppConfig) -> LedgerResult<Self> {
        let stores = if config.temporary {
            Stores::temporary()?
        } else {
            Stores::open(&config.data_dir)?
        };
        Self::with_stores(stores, config)
    }

    /// 在已打开的存储上创建状态机，并恢复上次提交的高度和应用哈希
    pub fn with_stores(stores: Stores, config: AppConfig) -> LedgerResult<Self> {
        let authorizer: Box<dyn Authorizer> = if config.verify_authorization {
            Box::new(Secp256k1Authorizer::new())
        } else {
            Box::new(AcceptAll)
        };

        let (height, last_height) = match stores.meta(META_HEIGHT)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    LedgerError::CorruptEntry {
                        tree: "meta",
                        reason: "height is not 8 bytes".to_string(),
                    }
                })?;
                let last = i64::from_be_bytes(bytes);
                (last + 1, last)
            }
            None => (0, 0),
        };
        let last_app_hash = stores.meta(META_APP_HASH)?.unwrap_or_default();

        info!(
            "Ledger state machine ready at height {} (digest: {:?}, utxo keying: {:?})",
            height, config.commit_digest, config.utxo_keying
        );
        Ok(DebtLedgerApp {
            stores,
            config,
            authorizer,
            pending: WriteSet::default(),
            block_hashes: Vec::new(),
            height,
            last_height,
            last_app_hash,
            phase: BlockPhase::Idle,
        })
    }

    /// 替换授权能力
    pub fn with_authorizer(mut self, authorizer: Box<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn phase(&self) -> BlockPhase {
        self.phase
    }

    /// 本区块尚未提交的写入数量
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// 已提交状态上的系统信用总额
    pub fn aggregate_credits(&self) -> LedgerResult<u64> {
        let empty = WriteSet::default();
        bookkeeping::aggregate_credits(&StagedView::new(&self.stores, &empty))
    }

    /// 已提交状态上的系统债务总额
    pub fn aggregate_debt(&self) -> LedgerResult<u64> {
        let empty = WriteSet::default();
        bookkeeping::aggregate_debt(&StagedView::new(&self.stores, &empty))
    }

    fn authorize(&self, tx: &Transaction) -> LedgerResult<()> {
        if !self.config.verify_authorization {
            return Ok(());
        }
        authorize_transaction(self.authorizer.as_ref(), tx)
    }

    /// 在暂存视图中执行一笔交易；成功时把写入并入区块写集合，失败时全部丢弃
    fn stage<T>(
        &mut self,
        apply: impl FnOnce(&mut StagedView<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let (value, writes) = {
            let mut view = StagedView::new(&self.stores, &self.pending);
            let value = apply(&mut view)?;
            (value, view.into_writes())
        };
        self.pending.merge(writes);
        Ok(value)
    }

    fn decode_failure(err: &LedgerError, cmd: Option<&Command>) -> TxResponse {
        let what = if cmd.is_some() { "transaction" } else { "command JSON" };
        let mut response = TxResponse::reject(
            err.code(),
            format!("Could not parse {}", what),
            err.to_string(),
        );
        if let Some(cmd) = cmd {
            response.data = cmd.transaction.clone().into_bytes();
        }
        response
    }

    fn unrecognized(&self, name: &str, raw: &[u8]) -> TxResponse {
        if self.config.strict_responses {
            return TxResponse::reject(
                CODE_UNKNOWN_COMMAND,
                "unrecognized command",
                format!("unrecognized command {:?}", name),
            );
        }
        warn!("accepting unrecognized command {:?} without effect", name);
        TxResponse::ok("unrecognized command", raw.to_vec())
    }

    fn deliver_issuance(&mut self, tx: Transaction) -> TxResponse {
        if !tx.is_well_formed() {
            return TxResponse::reject(
                CODE_INVALID_TRANSACTION,
                "Invalid Transaction",
                "input count does not match output count",
            );
        }
        if self.config.strict_responses && !tx.is_debt_issuance() {
            return TxResponse::reject(
                CODE_INVALID_TRANSACTION,
                "Invalid Transaction",
                "issuance must have a single debt attestation input",
            );
        }
        if let Err(e) = self.authorize(&tx) {
            return TxResponse::from_error(&e);
        }

        let keying = self.config.utxo_keying;
        match self.stage(|view| bookkeeping::apply_issuance(view, &tx, keying)) {
            Ok(total) => {
                let tx_hash = tx.hash();
                debug!("delivered issuance {}", hex::encode(&tx_hash));
                self.block_hashes.push(tx_hash.clone());
                TxResponse::ok(format!("Total System Credits: {}", total), hex::encode(tx_hash))
            }
            Err(e) => TxResponse::from_error(&e),
        }
    }

    fn deliver_repayment(&mut self, tx: Transaction) -> TxResponse {
        if let Err(e) = self.authorize(&tx) {
            return TxResponse::from_error(&e);
        }

        match self.stage(|view| bookkeeping::apply_repayment(view, &tx)) {
            Ok(receipt) => {
                debug!(
                    "delivered repayment {}, record now {} with {} remaining",
                    tx.hash_hex(),
                    hex::encode(&receipt.record_key),
                    receipt.remaining
                );
                self.block_hashes.push(tx.hash());
                TxResponse::ok(
                    format!("Total System Debt: {}", receipt.total_debt),
                    hex::encode(&receipt.record_key),
                )
            }
            Err(e @ LedgerError::DebtNotFound(_)) if !self.config.strict_responses => {
                warn!("repayment lookup failed, answering with success code: {}", e);
                let mut response = TxResponse::from_error(&e);
                response.code = CODE_OK;
                response
            }
            Err(e) => TxResponse::from_error(&e),
        }
    }
}

impl Application for DebtLedgerApp {
    fn info(&self) -> ResponseInfo {
        ResponseInfo {
            last_block_height: self.last_height,
            last_block_app_hash: self.last_app_hash.clone(),
        }
    }

    fn begin_block(&mut self) {
        if !self.pending.is_empty() {
            warn!("discarding {} uncommitted writes from previous block", self.pending.len());
            self.pending.clear();
        }
        self.block_hashes.clear();
        self.phase = BlockPhase::BlockOpen;
    }

    /// 无状态准入检查，不读写任何存储
    fn check_tx(&self, raw: &[u8]) -> TxResponse {
        let cmd = match Command::decode(raw) {
            Ok(cmd) => cmd,
            Err(e) => return Self::decode_failure(&e, None),
        };

        let kind = cmd.kind();
        let tx = match kind {
            CommandKind::Unrecognized(ref name) => return self.unrecognized(name, raw),
            _ => match cmd.transaction() {
                Ok(tx) => tx,
                Err(e) => return Self::decode_failure(&e, Some(&cmd)),
            },
        };
        if let Err(e) = self.authorize(&tx) {
            return TxResponse::from_error(&e);
        }

        match kind {
            CommandKind::IssueDebt => TxResponse::ok(
                tx.total_output_value().to_string(),
                "Valid IssueDebt Cmd",
            ),
            _ => TxResponse::ok(String::new(), "Valid Repayment Cmd"),
        }
    }

    fn deliver_tx(&mut self, raw: &[u8]) -> TxResponse {
        if self.phase != BlockPhase::BlockOpen {
            warn!("DeliverTx outside an open block");
        }
        let cmd = match Command::decode(raw) {
            Ok(cmd) => cmd,
            Err(e) => return Self::decode_failure(&e, None),
        };

        match cmd.kind() {
            CommandKind::IssueDebt => match cmd.transaction() {
                Ok(tx) => self.deliver_issuance(tx),
                Err(e) => Self::decode_failure(&e, Some(&cmd)),
            },
            CommandKind::Repayment => match cmd.transaction() {
                Ok(tx) => self.deliver_repayment(tx),
                Err(e) => Self::decode_failure(&e, Some(&cmd)),
            },
            CommandKind::Unrecognized(name) => self.unrecognized(&name, raw),
        }
    }

    fn end_block(&mut self, height: i64) {
        self.height = height;
    }

    fn commit(&mut self) -> LedgerResult<ResponseCommit> {
        let digest = match self.config.commit_digest {
            DigestMode::Merkle => chain_app_hash(&self.last_app_hash, &self.block_hashes),
            DigestMode::LegacyHeight => legacy_height_digest(self.height),
        };
        let committed_height = self.height;
        self.stores.commit(
            &self.pending,
            &[
                (META_HEIGHT, committed_height.to_be_bytes().to_vec()),
                (META_APP_HASH, digest.clone()),
            ],
        )?;

        info!(
            "Committed block {} with {} transactions, app hash {}",
            committed_height,
            self.block_hashes.len(),
            hex::encode(&digest)
        );
        self.pending.clear();
        self.block_hashes.clear();
        self.last_height = committed_height;
        self.last_app_hash = digest.clone();
        self.height += 1;
        self.phase = BlockPhase::BlockClosed;
        Ok(ResponseCommit { data: digest })
    }

    fn query(&self, request: &RequestQuery) -> ResponseQuery {
        let value = |bytes: Vec<u8>| ResponseQuery {
            value: bytes,
            ..ResponseQuery::default()
        };
        let failed = |err: LedgerError| ResponseQuery {
            code: err.code(),
            log: err.to_string(),
            value: Vec::new(),
        };

        match request.path.trim_start_matches('/') {
            "" => value(b"empty query path".to_vec()),
            "test" => value(b"test".to_vec()),
            "credits" => match self.aggregate_credits() {
                Ok(total) => value(total.to_string().into_bytes()),
                Err(e) => failed(e),
            },
            "debt" => match self.aggregate_debt() {
                Ok(total) => value(total.to_string().into_bytes()),
                Err(e) => failed(e),
            },
            "tx" => match self.stores.ledger.get(&request.data) {
                Ok(Some(raw)) => value(raw),
                Ok(None) => ResponseQuery {
                    code: CODE_NOT_FOUND,
                    log: format!("transaction {} not found", hex::encode(&request.data)),
                    value: Vec::new(),
                },
                Err(e) => failed(e),
            },
            _ => value(b"could not recognize path".to_vec()),
        }
    }
}
