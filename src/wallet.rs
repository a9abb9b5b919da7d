//! # 钱包模块
//!
//! 在链下构造并签名债务发行与还款交易。

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::auth::{components_from_signature, key_hash};
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{Transaction, TxInput, TxOutput, UnlockingScript};

pub struct Wallet {
    pub private_key: SecretKey,
    pub public_key: PublicKey,
    /// 公钥哈希，作为输出的接收地址
    pub key_hash: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Self {
        let secp = Secp256k1::new();
        let mut rng = rand::thread_rng();
        let (secret_key, public_key) = secp.generate_keypair(&mut rng);
        Self::from_keys(secret_key, public_key)
    }

    /// 从32字节私钥恢复钱包
    pub fn from_secret_bytes(bytes: &[u8]) -> LedgerResult<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| LedgerError::encoding("secret key", e))?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self::from_keys(secret_key, public_key))
    }

    fn from_keys(private_key: SecretKey, public_key: PublicKey) -> Self {
        Wallet {
            private_key,
            key_hash: key_hash(&public_key),
            public_key,
        }
    }

    /// 压缩格式公钥，用作债权人身份引用和解锁脚本中的公钥
    pub fn identity(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// 构造向债务人发行 `amount` 的债务交易
    ///
    /// 唯一的输入是债务发行证明，引用本钱包的身份公钥。
    pub fn construct_debt_transaction(&self, debtor_key_hash: &[u8], amount: u64) -> Transaction {
        let input = TxInput::debt_attestation(&self.identity(), self.unlocking_script());
        let output = TxOutput::new(debtor_key_hash, amount);
        let mut tx = Transaction::new(vec![input], vec![output]);
        self.sign_transaction(&mut tx);
        tx
    }

    /// 构造还款交易
    ///
    /// # 参数
    ///
    /// * `debt_key` - 债务记录当前的键（首次还款时为债权人身份，之后为上一次还款返回的新键）
    /// * `creditor_key_hash` - 还款接收方
    /// * `amount` - 还款金额
    pub fn construct_repayment_transaction(
        &self,
        debt_key: &[u8],
        creditor_key_hash: &[u8],
        amount: u64,
    ) -> Transaction {
        let input = TxInput {
            reference: debt_key.to_vec(),
            output_index: 0,
            unlocking_script: self.unlocking_script(),
        };
        let output = TxOutput::new(creditor_key_hash, amount);
        let mut tx = Transaction::new(vec![input], vec![output]);
        self.sign_transaction(&mut tx);
        tx
    }

    /// 对签名哈希签名，并写入每个由本钱包公钥解锁的输入
    pub fn sign_transaction(&self, tx: &mut Transaction) {
        let secp = Secp256k1::signing_only();
        let hash = tx.signing_hash();
        // SHA-256输出恰好32字节
        let message = match Message::from_slice(&hash) {
            Ok(message) => message,
            Err(_) => return,
        };
        let signature = components_from_signature(&secp.sign_ecdsa(&message, &self.private_key));

        let identity = self.identity();
        for input in &mut tx.inputs {
            if input.unlocking_script.public_key == identity {
                input.unlocking_script.signature = signature.clone();
            }
        }
    }

    fn unlocking_script(&self) -> UnlockingScript {
        UnlockingScript {
            public_key: self.identity(),
            ..UnlockingScript::default()
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
