//! # 债务账本状态机
//!
//! 由拜占庭容错共识引擎驱动的复制账本应用层，使用UTXO风格的交易模型跟踪一种简化“债务”工具的发行与还款。
//! 共识引擎提供已最终确定、全序的交易，本状态机负责确定性地校验、应用和持久化它们，使所有副本收敛到相同状态。
//!
//! ## 主要模块
//!
//! * `transaction` - 交易、输入、输出及其哈希/序列化约定
//! * `envelope` - 提交给共识引擎的命令信封
//! * `store` - 账本、UTXO、债务三个持久化存储以及区块暂存写集合
//! * `bookkeeping` - 发行、还款和汇总查询
//! * `app` - 共识回调状态机
//! * `auth` - 签名授权检查
//! * `wallet` - 链下交易构造

pub mod app;
pub mod auth;
pub mod bookkeeping;
pub mod codec;
pub mod config;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod store;
pub mod transaction;
pub mod wallet;

pub use app::{Application, DebtLedgerApp, TxResponse};
pub use config::AppConfig;
pub use error::{LedgerError, LedgerResult};
pub use transaction::{Transaction, TxInput, TxOutput};
