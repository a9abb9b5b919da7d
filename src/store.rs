//! # 存储模块
//!
//! 三个相互独立的键值集合：账本存储（只追加的交易日志）、UTXO存储（按接收者索引的可领取输出）
//! 和债务存储（按发行者引用索引的未偿债务记录），全部位于同一个sled数据库的不同树中。
//!
//! 区块执行期间的写入不会直接落盘：每笔交易先写入自己的写集合，成功后并入区块写集合，
//! 在 `Commit` 时通过一个跨树事务一次性提交。因此单笔交易对三个存储的修改要么全部生效，
//! 要么全部丢弃，而已提交状态只在区块提交时改变。

use log::{debug, info};
use sled::transaction::{TransactionError, TransactionResult, Transactional};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};

const META_TREE: &str = "meta";
pub const META_HEIGHT: &[u8] = b"height";
pub const META_APP_HASH: &[u8] = b"app_hash";

/// 存储集合标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Ledger,
    Utxo,
    Debt,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Ledger, Collection::Utxo, Collection::Debt];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Ledger => "ledger",
            Collection::Utxo => "utxo",
            Collection::Debt => "debt",
        }
    }
}

/// 单个键值集合
#[derive(Clone)]
pub struct Store {
    tree: sled::Tree,
    collection: Collection,
}

impl Store {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> LedgerResult<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    pub fn delete(&self, key: &[u8]) -> LedgerResult<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    /// 全量扫描，调用方不依赖返回顺序
    pub fn scan(&self) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (k, v) = item?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// 三个存储加上保存提交高度与应用哈希的元数据树
pub struct Stores {
    db: sled::Db,
    pub ledger: Store,
    pub utxo: Store,
    pub debt: Store,
    meta: sled::Tree,
}

impl Stores {
    /// 打开或创建位于 `path` 的数据库
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::Config::default().path(path.as_ref()).open()?;
        info!("Opened ledger database at {:?}", path.as_ref());
        Self::from_db(db)
    }

    /// 打开一个临时数据库，进程退出后删除
    pub fn temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> LedgerResult<Self> {
        let open = |collection: Collection| -> LedgerResult<Store> {
            Ok(Store {
                tree: db.open_tree(collection.name())?,
                collection,
            })
        };
        Ok(Stores {
            ledger: open(Collection::Ledger)?,
            utxo: open(Collection::Utxo)?,
            debt: open(Collection::Debt)?,
            meta: db.open_tree(META_TREE)?,
            db,
        })
    }

    pub fn store(&self, collection: Collection) -> &Store {
        match collection {
            Collection::Ledger => &self.ledger,
            Collection::Utxo => &self.utxo,
            Collection::Debt => &self.debt,
        }
    }

    pub fn meta(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.meta.get(key)?.map(|v| v.to_vec()))
    }

    /// 三个存储的完整拷贝，用于比较前后状态
    pub fn snapshot(&self) -> LedgerResult<BTreeMap<Collection, BTreeMap<Vec<u8>, Vec<u8>>>> {
        let mut snapshot = BTreeMap::new();
        for collection in Collection::ALL {
            let entries = self.store(collection).scan()?.into_iter().collect();
            snapshot.insert(collection, entries);
        }
        Ok(snapshot)
    }

    /// 在一个跨树事务中应用区块写集合和元数据
    pub fn commit(&self, writes: &WriteSet, meta: &[(&[u8], Vec<u8>)]) -> LedgerResult<()> {
        let result: TransactionResult<(), ()> =
            (&self.ledger.tree, &self.utxo.tree, &self.debt.tree, &self.meta).transaction(
                |(ledger, utxo, debt, meta_tree)| {
                    for ((collection, key), value) in writes.entries.iter() {
                        let tree = match collection {
                            Collection::Ledger => ledger,
                            Collection::Utxo => utxo,
                            Collection::Debt => debt,
                        };
                        match value {
                            Some(value) => {
                                tree.insert(key.as_slice(), value.as_slice())?;
                            }
                            None => {
                                tree.remove(key.as_slice())?;
                            }
                        }
                    }
                    for (key, value) in meta {
                        meta_tree.insert(*key, value.as_slice())?;
                    }
                    Ok(())
                },
            );
        result.map_err(|e| match e {
            TransactionError::Abort(()) => LedgerError::Transaction("commit aborted".to_string()),
            TransactionError::Storage(e) => LedgerError::Store(e),
        })?;
        self.db.flush()?;
        debug!("Committed {} staged writes", writes.len());
        Ok(())
    }
}

/// 暂存的写入集合，`None` 表示删除
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    entries: BTreeMap<(Collection, Vec<u8>), Option<Vec<u8>>>,
}

impl WriteSet {
    pub fn put(&mut self, collection: Collection, key: &[u8], value: Vec<u8>) {
        self.entries.insert((collection, key.to_vec()), Some(value));
    }

    pub fn delete(&mut self, collection: Collection, key: &[u8]) {
        self.entries.insert((collection, key.to_vec()), None);
    }

    /// 外层 `None` 表示该键未被暂存，内层 `None` 表示已暂存删除
    pub fn lookup(&self, collection: Collection, key: &[u8]) -> Option<Option<&Vec<u8>>> {
        self.entries
            .get(&(collection, key.to_vec()))
            .map(|value| value.as_ref())
    }

    /// 后写覆盖先写
    pub fn merge(&mut self, other: WriteSet) {
        self.entries.extend(other.entries);
    }

    fn overlay(&self, collection: Collection, entries: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        for ((c, key), value) in &self.entries {
            if *c != collection {
                continue;
            }
            match value {
                Some(value) => {
                    entries.insert(key.clone(), value.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 单笔交易的暂存视图
///
/// 读取顺序：本交易写集合 → 区块写集合 → 已提交状态。写入只进入本交易写集合。
pub struct StagedView<'a> {
    stores: &'a Stores,
    block: &'a WriteSet,
    writes: WriteSet,
}

impl<'a> StagedView<'a> {
    pub fn new(stores: &'a Stores, block: &'a WriteSet) -> Self {
        StagedView {
            stores,
            block,
            writes: WriteSet::default(),
        }
    }

    pub fn get(&self, collection: Collection, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
        if let Some(staged) = self.writes.lookup(collection, key) {
            return Ok(staged.cloned());
        }
        if let Some(staged) = self.block.lookup(collection, key) {
            return Ok(staged.cloned());
        }
        self.stores.store(collection).get(key)
    }

    pub fn contains(&self, collection: Collection, key: &[u8]) -> LedgerResult<bool> {
        Ok(self.get(collection, key)?.is_some())
    }

    pub fn put(&mut self, collection: Collection, key: &[u8], value: Vec<u8>) {
        debug!(
            "stage put {}/{} ({} bytes)",
            collection.name(),
            hex::encode(key),
            value.len()
        );
        self.writes.put(collection, key, value);
    }

    pub fn delete(&mut self, collection: Collection, key: &[u8]) {
        debug!("stage delete {}/{}", collection.name(), hex::encode(key));
        self.writes.delete(collection, key);
    }

    /// 合并后的全量扫描
    pub fn scan(&self, collection: Collection) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> =
            self.stores.store(collection).scan()?.into_iter().collect();
        self.block.overlay(collection, &mut entries);
        self.writes.overlay(collection, &mut entries);
        Ok(entries.into_iter().collect())
    }

    pub fn into_writes(self) -> WriteSet {
        self.writes
    }
}
